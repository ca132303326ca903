pub mod atom;
pub mod dedup;
pub mod transport;

use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use atom::FeedDocument;
use transport::MailboxTransport;

/// Path segment selecting the personal section of a sectioned inbox.
pub const SECTIONED_SUFFIX: &str = "/^sq_ig_i_personal";

/// Which inbox layout the page reports; picks the feed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedVariant {
    #[default]
    Classic,
    Sectioned,
}

impl FeedVariant {
    pub fn suffix(self) -> &'static str {
        match self {
            FeedVariant::Classic => "",
            FeedVariant::Sectioned => SECTIONED_SUFFIX,
        }
    }
}

/// Fetches and parses one session's mail feed.
///
/// Requests carry a strictly increasing `v` parameter as a cache buster.
/// Responses are not matched against it: every fetch of a session is
/// awaited on that session's own task, so replies cannot arrive out of order.
pub struct FeedClient {
    transport: Arc<dyn MailboxTransport>,
    version: u64,
}

impl FeedClient {
    pub fn new(transport: Arc<dyn MailboxTransport>) -> Self {
        Self {
            transport,
            version: 0,
        }
    }

    /// Version used by the most recent request; 0 before the first one.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn feed_path(variant: FeedVariant, version: u64) -> String {
        format!("feed/atom{}?v={}", variant.suffix(), version)
    }

    pub async fn fetch(&mut self, variant: FeedVariant) -> SessionResult<FeedDocument> {
        self.version += 1;
        let path = Self::feed_path(variant, self.version);

        let reply = self.transport.get(&path).await?;
        if !reply.is_success() {
            return Err(SessionError::Status(reply.status));
        }

        atom::parse_feed(&reply.body)
    }
}
