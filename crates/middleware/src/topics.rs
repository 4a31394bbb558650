use std::sync::Arc;

use dashmap::DashMap;

/// Topic naming for one namespace and encoding.
/// Caches formatted topics so the produce path does not allocate per message.
pub struct TopicBuilder {
    /// Pre-computed suffix: ".{encoding}"
    suffix: Arc<str>,
    /// Pre-computed prefix: "{namespace}."
    prefix: Arc<str>,
    /// Pre-computed wildcard: "{namespace}.>"
    wildcard: Arc<str>,
    /// Pre-computed stream name: "{NAMESPACE}_{ENCODING}"
    stream_name: Arc<str>,
    /// Cache of model -> topic
    topic_cache: DashMap<Arc<str>, Arc<str>>,
}

impl TopicBuilder {
    pub fn new(namespace: impl Into<String>, encoding: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let encoding = encoding.into();
        let stream_name = format!("{}_{}", namespace, encoding)
            .replace('.', "_")
            .to_uppercase();
        Self::with_stream(namespace, encoding, stream_name)
    }

    /// Use an explicit JetStream stream name instead of the derived one
    pub fn with_stream(
        namespace: impl Into<String>,
        encoding: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let encoding = encoding.into();
        let stream_name: String = stream_name.into();
        Self {
            suffix: format!(".{}", encoding).into(),
            prefix: format!("{}.", namespace).into(),
            wildcard: format!("{}.>", namespace).into(),
            stream_name: stream_name.into(),
            topic_cache: DashMap::new(),
        }
    }

    /// Topic for a model: {namespace}.{model}.{encoding}
    #[inline]
    pub fn topic(&self, model: &str) -> Arc<str> {
        if let Some(cached) = self.topic_cache.get(model) {
            return Arc::clone(cached.value());
        }

        let topic: Arc<str> = format!("{}{}{}", self.prefix, model, self.suffix).into();
        self.topic_cache.insert(model.into(), Arc::clone(&topic));
        topic
    }

    /// Wildcard covering every topic in the namespace
    #[inline]
    pub fn all(&self) -> &str {
        &self.wildcard
    }

    #[inline]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Bus subject for one partition of a topic: {topic}.p{partition}
    pub fn partition_subject(topic: &str, partition: u32) -> String {
        format!("{}.p{}", topic, partition)
    }

    /// Subject pattern matching every partition of a topic
    pub fn partitions_wildcard(topic: &str) -> String {
        format!("{}.*", topic)
    }

    /// Recover the logical topic from a partition subject
    pub fn topic_of_subject(subject: &str) -> &str {
        match subject.rsplit_once('.') {
            Some((topic, part)) if part.starts_with('p') && part[1..].parse::<u32>().is_ok() => {
                topic
            }
            _ => subject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic() {
        let builder = TopicBuilder::new("cryptics.thalex", "avro");
        assert_eq!(builder.topic("ticker").as_ref(), "cryptics.thalex.ticker.avro");
    }

    #[test]
    fn test_topic_cached() {
        let builder = TopicBuilder::new("cryptics.thalex", "avro");
        let first = builder.topic("ack");
        let second = builder.topic("ack");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_wildcard_and_stream() {
        let builder = TopicBuilder::new("cryptics.thalex", "avro");
        assert_eq!(builder.all(), "cryptics.thalex.>");
        assert_eq!(builder.stream_name(), "CRYPTICS_THALEX_AVRO");
    }

    #[test]
    fn test_explicit_stream() {
        let builder = TopicBuilder::with_stream("cryptics.thalex", "avro", "MARKET_DATA");
        assert_eq!(builder.stream_name(), "MARKET_DATA");
    }

    #[test]
    fn test_partition_subjects() {
        let subject = TopicBuilder::partition_subject("cryptics.thalex.ticker.avro", 2);
        assert_eq!(subject, "cryptics.thalex.ticker.avro.p2");
        assert_eq!(
            TopicBuilder::topic_of_subject(&subject),
            "cryptics.thalex.ticker.avro"
        );
        assert_eq!(
            TopicBuilder::partitions_wildcard("cryptics.thalex.ticker.avro"),
            "cryptics.thalex.ticker.avro.*"
        );
    }

    #[test]
    fn test_topic_of_plain_subject() {
        assert_eq!(
            TopicBuilder::topic_of_subject("cryptics.thalex.ticker.avro"),
            "cryptics.thalex.ticker.avro"
        );
        assert_eq!(TopicBuilder::topic_of_subject("a.pb"), "a.pb");
    }
}
