use rand::{distributions::Alphanumeric, thread_rng, Rng};

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Trims a chat message and checks it against the length limit.
/// Returns `None` if it is too long.
pub fn normalize_content(content: &str, max_length: usize) -> Option<&str> {
    let trimmed = content.trim();
    let length = trimmed.chars().count();

    (length <= max_length).then_some(trimmed)
}
