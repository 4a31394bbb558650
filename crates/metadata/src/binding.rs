/// Topic and table a model is bound to. Fixed once the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    pub model: String,
    pub topic: String,
    pub table: String,
}

impl TopicBinding {
    pub fn new(model: impl Into<String>, topic: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            topic: topic.into(),
            table: table.into(),
        }
    }

    /// Schema registry subject for the topic's values
    pub fn value_subject(&self) -> String {
        format!("{}-value", self.topic)
    }

    /// Topic used for messages that could not be serialized
    pub fn dead_letter_topic(&self) -> String {
        format!("{}.dlq", self.topic)
    }
}
