use std::sync::Arc;

/// One text rewriting step.
pub trait TextRule: Send + Sync {
    fn apply(&self, text: &str) -> String;
}

pub trait TextPipelineExt {
    fn add_if<T, F>(self, condition: bool, factory: F) -> Self
    where
        T: TextRule + 'static,
        F: FnOnce() -> T;
}

#[derive(Clone)]
pub struct TextPipeline {
    rules: Vec<Arc<dyn TextRule>>,
}

impl TextPipeline {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
    }

    pub fn add_rule<T: TextRule + 'static>(mut self, rule: T) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TextPipelineExt for TextPipeline {
    fn add_if<T, F>(mut self, condition: bool, factory: F) -> Self
    where
        T: TextRule + 'static,
        F: FnOnce() -> T,
    {
        if condition {
            self = self.add_rule(factory());
        }
        self
    }
}

impl Default for TextPipeline {
    fn default() -> Self {
        Self::new()
    }
}
