/// Allow-list of origins that may open a stream.
///
/// Matching is exact. A request without an `Origin` header is refused.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = origins
            .into_iter()
            .map(|o| o.as_ref().trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|origin| self.allowed.iter().any(|allowed| allowed == origin))
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}
