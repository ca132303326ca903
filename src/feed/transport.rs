use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Raw reply from the mailbox origin.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated GET against one session's mailbox origin. Each session
/// owns its own transport, so cookies never leak across accounts.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    /// `path_and_query` is relative to the mailbox URL.
    async fn get(&self, path_and_query: &str) -> SessionResult<HttpReply>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
}

impl HttpTransport {
    pub fn new(
        mailbox_url: &str,
        user_agent: Option<&str>,
        session_cookie: Option<&str>,
    ) -> SessionResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| SessionError::Host(format!("invalid session cookie: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(Duration::from_secs(30));
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua.to_string());
        }

        Ok(Self {
            client: builder.build()?,
            base: mailbox_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MailboxTransport for HttpTransport {
    async fn get(&self, path_and_query: &str) -> SessionResult<HttpReply> {
        let url = format!("{}/{}", self.base, path_and_query.trim_start_matches('/'));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(HttpReply {
            status,
            url: final_url,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport double: replies are keyed by path prefix and consumed in
    /// order; every requested path is recorded.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<Vec<(String, VecDeque<SessionResult<HttpReply>>)>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn push(&self, prefix: &str, status: u16, body: &str) {
            let reply = Ok(HttpReply {
                status,
                url: prefix.to_string(),
                body: body.to_string(),
            });
            self.push_result(prefix, reply);
        }

        pub fn push_result(&self, prefix: &str, reply: SessionResult<HttpReply>) {
            let mut replies = self.replies.lock().unwrap();
            match replies.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(reply),
                None => replies.push((prefix.to_string(), VecDeque::from([reply]))),
            }
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailboxTransport for ScriptedTransport {
        async fn get(&self, path_and_query: &str) -> SessionResult<HttpReply> {
            self.requests.lock().unwrap().push(path_and_query.to_string());
            let mut replies = self.replies.lock().unwrap();
            // longest matching prefix wins so "" acts as a catch-all
            let slot = replies
                .iter_mut()
                .filter(|(p, _)| path_and_query.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            match slot.and_then(|(_, queue)| queue.pop_front()) {
                Some(reply) => reply,
                None => Err(SessionError::Status(404)),
            }
        }
    }
}
