//! Message sources.

pub mod email;
pub mod imap;

pub use email::{ImapSource, MailboxConfig, is_sender_allowed};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::pipeline::types::RawMessage;

/// Which mailbox messages a fetch considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selector {
    #[default]
    All,
    Unseen,
}

impl Selector {
    /// IMAP `SEARCH` criterion for this selector.
    pub fn search_criterion(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Unseen => "UNSEEN",
        }
    }
}

impl std::str::FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unseen" => Ok(Self::Unseen),
            other => Err(format!("expected 'all' or 'unseen', got '{other}'")),
        }
    }
}

/// A mailbox-like store of candidate messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Fetch at most `batch_limit` of the most recent messages matching `selector`,
    /// in ascending mailbox order.
    ///
    /// Fails with [`SourceError::Unavailable`] when the store cannot be reached;
    /// no partial result is returned in that case.
    async fn fetch(
        &self,
        batch_limit: usize,
        selector: Selector,
    ) -> Result<Vec<RawMessage>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parse() {
        assert_eq!("all".parse::<Selector>().unwrap(), Selector::All);
        assert_eq!(" Unseen ".parse::<Selector>().unwrap(), Selector::Unseen);
        assert!("recent".parse::<Selector>().is_err());
    }

    #[test]
    fn selector_search_criterion() {
        assert_eq!(Selector::All.search_criterion(), "ALL");
        assert_eq!(Selector::Unseen.search_criterion(), "UNSEEN");
    }
}
