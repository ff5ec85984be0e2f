//! Topic name and topic filter rules of MQTT 3.1.1

/// Longest topic name or filter, in bytes, the two byte length prefix can carry
const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Checks if a topic name is valid for publishing.
///
/// Topic names must be non-empty, at most 65535 bytes long and may not
/// contain wildcards or NUL.
pub fn valid_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= MAX_TOPIC_LEN && !topic.contains(['+', '#', '\0'])
}

/// Checks if a topic filter is valid for subscribing.
///
/// `+` must occupy a whole level and `#` must occupy the whole last level.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > MAX_TOPIC_LEN || filter.contains('\0') {
        return false;
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let last = levels.peek().is_none();
        match level {
            "#" if last => {}
            "+" => {}
            level if level.contains(['+', '#']) => return false,
            _ => {}
        }
    }

    true
}

/// Checks if `topic` is matched by `filter`.
///
/// Both are assumed to be valid. Topics starting with `$` are never matched
/// by a filter starting with a wildcard.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && filter.starts_with(['+', '#']) {
        return false;
    }

    let mut topics = topic.split('/');
    for level in filter.split('/') {
        match (level, topics.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (level, Some(t)) if level == t => {}
            _ => return false,
        }
    }

    topics.next().is_none()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcards_are_not_allowed_in_topic_names() {
        assert!(valid_topic("sdk/test/Python"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("sdk/+/Python"));
        assert!(!valid_topic("sdk/#"));
        assert!(!valid_topic("sdk/\0"));
    }

    #[test]
    fn filters_need_whole_level_wildcards() {
        assert!(valid_filter("sdk/test/Python"));
        assert!(valid_filter("#"));
        assert!(valid_filter("+"));
        assert!(valid_filter("sdk/+/Python"));
        assert!(valid_filter("sdk/#"));
        assert!(valid_filter("/"));

        assert!(!valid_filter(""));
        assert!(!valid_filter("sdk/#/Python"));
        assert!(!valid_filter("sdk/te#"));
        assert!(!valid_filter("sdk/te+/Python"));
        assert!(!valid_filter("sdk/++"));
    }

    #[test]
    fn length_is_bounded_by_the_prefix() {
        let longest = "a".repeat(u16::MAX as usize);
        let too_long = "a".repeat(u16::MAX as usize + 1);

        assert!(valid_topic(&longest));
        assert!(valid_filter(&longest));
        assert!(!valid_topic(&too_long));
        assert!(!valid_filter(&too_long));
    }

    #[test]
    fn single_level_wildcard_matches_exactly_one_level() {
        assert!(matches("sensors/+/temperature", "sensors/1/temperature"));
        assert!(matches("sensors/+", "sensors/"));
        assert!(!matches("sensors/+", "sensors"));
        assert!(!matches("sensors/+", "sensors/1/temperature"));
    }

    #[test]
    fn multi_level_wildcard_matches_parent_and_children() {
        assert!(matches("sensors/#", "sensors"));
        assert!(matches("sensors/#", "sensors/1/temperature"));
        assert!(matches("#", "a/b/c"));
        assert!(!matches("sensors/#", "actuators/1"));
    }

    #[test]
    fn exact_filter_matches_only_its_topic() {
        assert!(matches("test/topic", "test/topic"));
        assert!(!matches("test/topic", "test/topic/more"));
        assert!(!matches("test/topic/more", "test/topic"));
    }

    #[test]
    fn system_topics_need_an_explicit_prefix() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }
}
