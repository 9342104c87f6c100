use ragforge_core::{Chunk, Message};

/// The prompt of one model call: system prompt plus a bounded message window.
pub struct ContextWindow {
    messages: Vec<Message>,
    system_prompt: Option<String>,
    max_messages: usize,
}

impl ContextWindow {
    /// An empty window keeping at most `max_messages` messages.
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            max_messages,
        }
    }

    /// Sets the system prompt; an empty prompt clears it.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.system_prompt = Some(prompt).filter(|p| !p.is_empty());
    }

    /// The system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Appends a message, dropping the oldest ones past the window.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.truncate();
    }

    /// Appends messages in order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Messages in the window, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn truncate(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    /// Rough token estimation (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        let sys_tokens = self
            .system_prompt
            .as_ref()
            .map(|s| s.len() / 4)
            .unwrap_or(0);
        let msg_tokens: usize = self.messages.iter().map(|m| m.content.len() / 4).sum();
        sys_tokens + msg_tokens
    }
}

/// Numbered reference block listing retrieved chunks, best first.
///
/// Empty when there are no chunks.
pub fn render_references(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[{}] {} (part {})\n{}",
                i + 1,
                chunk.document_name,
                chunk.index,
                chunk.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User turn text with the references appended.
pub fn grounded_query(query: &str, chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return query.to_string();
    }
    format!("{query}\n\nReference material:\n{}", render_references(chunks))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn chunk(name: &str, index: i32, content: &str) -> Chunk {
        Chunk {
            id: format!("{name}-{index}"),
            content: content.into(),
            kb_id: "kb".into(),
            document_id: "doc".into(),
            document_name: name.into(),
            index,
            embedding: Vec::new(),
            score: Some(0.9),
            metadata: None,
        }
    }

    #[test]
    fn test_window_keeps_latest() {
        let mut ctx = ContextWindow::new(2);
        ctx.extend(["a", "b", "c"].map(|c| Message::user(c, "conv")));
        let contents: Vec<_> = ctx.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn test_empty_system_prompt_is_none() {
        let mut ctx = ContextWindow::new(4);
        ctx.set_system_prompt("");
        assert!(ctx.system_prompt().is_none());
    }

    #[test]
    fn test_references_are_numbered() {
        let text = render_references(&[chunk("a.pdf", 0, " alpha "), chunk("b.md", 3, "beta")]);
        assert_eq!(text, "[1] a.pdf (part 0)\nalpha\n\n[2] b.md (part 3)\nbeta");
    }

    #[test]
    fn test_grounded_query_without_chunks_is_plain() {
        assert_eq!(grounded_query("why?", &[]), "why?");
        assert!(grounded_query("why?", &[chunk("a", 0, "x")]).starts_with("why?\n\nReference material:\n[1]"));
    }
}
