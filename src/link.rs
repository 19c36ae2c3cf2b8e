use url::Url;

use crate::model::ActivityRecord;

/// Produces the document link written into the last column of a row.
pub trait LinkBuilder: Send + Sync {
    fn build(&self, record: &ActivityRecord) -> String;
}

/// Appends organization and title as query parameters to a base URL.
pub struct QueryLinkBuilder {
    base: String,
}

impl QueryLinkBuilder {
    pub fn new(base: &str) -> Self {
        QueryLinkBuilder {
            base: base.to_string(),
        }
    }
}

impl LinkBuilder for QueryLinkBuilder {
    fn build(&self, record: &ActivityRecord) -> String {
        match Url::parse_with_params(
            &self.base,
            &[("org", record.organization.as_str()), ("title", record.title.as_str())],
        ) {
            Ok(url) => url.to_string(),
            Err(_) => self.base.clone(),
        }
    }
}
