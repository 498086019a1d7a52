use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};
use webhub_types::ForumPost;

use super::{ForumClient, ForumError};
use crate::config::ForumConfig;
use crate::error::RelayError;

/// Builds the client for one configured forum. Called at most once per name.
pub type ClientFactory =
    Arc<dyn Fn(&ForumConfig) -> Result<Arc<dyn ForumClient>, RelayError> + Send + Sync>;

/// Shared owner of every forum session in the process.
///
/// Constructed once and handed to the monitor loop and the reply path, so
/// they share one client and one login per forum.
pub struct ForumHub {
    forums: HashMap<String, ForumConfig>,
    factory: ClientFactory,
    sessions: Mutex<HashMap<String, Arc<ForumSession>>>,
}

struct ForumSession {
    name: String,
    forum_id: String,
    client: Arc<dyn ForumClient>,
    logged_in: AtomicBool,
    /// Bumped after every finished login attempt.
    generation: AtomicU64,
    /// Held for the duration of a login attempt; stores its outcome.
    login: Mutex<Option<Result<(), String>>>,
}

impl ForumHub {
    pub fn new(forums: impl IntoIterator<Item = ForumConfig>, factory: ClientFactory) -> Self {
        Self {
            forums: forums.into_iter().map(|f| (f.name.clone(), f)).collect(),
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn forum_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.forums.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn forum_config(&self, name: &str) -> Option<&ForumConfig> {
        self.forums.get(name)
    }

    /// The shared client for `name`, building it on first use.
    pub async fn client(&self, name: &str) -> Result<Arc<dyn ForumClient>, RelayError> {
        Ok(Arc::clone(&self.session(name).await?.client))
    }

    pub async fn is_logged_in(&self, name: &str) -> bool {
        match self.sessions.lock().await.get(name) {
            Some(session) => session.logged_in.load(Ordering::Acquire),
            None => false,
        }
    }

    /// Log in to `name`.
    ///
    /// Callers that arrive while an attempt is running wait for it and share
    /// its outcome instead of starting their own. A failure is returned to
    /// all of them and is not retried here.
    pub async fn login(&self, name: &str) -> Result<(), RelayError> {
        let session = self.session(name).await?;
        if session.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }

        let seen = session.generation.load(Ordering::Acquire);
        let mut outcome = session.login.lock().await;
        if session.generation.load(Ordering::Acquire) != seen {
            return shared_outcome(&session.name, outcome.as_ref());
        }
        if session.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }

        let result = session.client.login().await;
        match &result {
            Ok(()) => {
                session.logged_in.store(true, Ordering::Release);
                info!(forum = %session.name, "forum login succeeded");
            }
            Err(e) => {
                session.logged_in.store(false, Ordering::Release);
                warn!(forum = %session.name, error = %e, "forum login failed");
            }
        }
        *outcome = Some(result.map_err(|e| e.to_string()));
        session.generation.fetch_add(1, Ordering::AcqRel);
        shared_outcome(&session.name, outcome.as_ref())
    }

    /// Log in only when no session is established.
    pub async fn ensure_logged_in(&self, name: &str) -> Result<(), RelayError> {
        if self.is_logged_in(name).await {
            return Ok(());
        }
        self.login(name).await
    }

    pub async fn fetch_new_posts(&self, name: &str) -> Result<Vec<ForumPost>, RelayError> {
        let session = self.logged_in_session(name).await?;
        session
            .client
            .fetch_new_posts(&session.forum_id)
            .await
            .map_err(|e| session.map_error(e))
    }

    pub async fn post_reply(
        &self,
        name: &str,
        thread_id: &str,
        content: &str,
        attachments: &[String],
    ) -> Result<bool, RelayError> {
        let session = self.logged_in_session(name).await?;
        session
            .client
            .post_reply(thread_id, content, attachments)
            .await
            .map_err(|e| session.map_error(e))
    }

    async fn logged_in_session(&self, name: &str) -> Result<Arc<ForumSession>, RelayError> {
        let session = self.session(name).await?;
        if !session.logged_in.load(Ordering::Acquire) {
            return Err(RelayError::Auth {
                forum: name.to_owned(),
                message: "not logged in".into(),
            });
        }
        Ok(session)
    }

    async fn session(&self, name: &str) -> Result<Arc<ForumSession>, RelayError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(name) {
            return Ok(Arc::clone(session));
        }
        let cfg = self
            .forums
            .get(name)
            .ok_or_else(|| RelayError::Config(format!("unknown forum `{name}`")))?;
        let client = (self.factory)(cfg)?;
        let session = Arc::new(ForumSession {
            name: cfg.name.clone(),
            forum_id: cfg.forum_id.clone(),
            client,
            logged_in: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            login: Mutex::new(None),
        });
        sessions.insert(name.to_owned(), Arc::clone(&session));
        info!(forum = %name, "forum client created");
        Ok(session)
    }
}

impl ForumSession {
    /// An auth failure mid-session drops the login until the next explicit
    /// `login` call.
    fn map_error(&self, e: ForumError) -> RelayError {
        match e {
            ForumError::Auth(message) => {
                self.logged_in.store(false, Ordering::Release);
                RelayError::Auth {
                    forum: self.name.clone(),
                    message,
                }
            }
            ForumError::Transient(message) => RelayError::Transient(message),
        }
    }
}

fn shared_outcome(forum: &str, outcome: Option<&Result<(), String>>) -> Result<(), RelayError> {
    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(message)) => Err(RelayError::Auth {
            forum: forum.to_owned(),
            message: message.clone(),
        }),
        None => Err(RelayError::Auth {
            forum: forum.to_owned(),
            message: "login did not run".into(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingClient {
        logins: AtomicUsize,
        fail_login: bool,
    }

    #[async_trait]
    impl ForumClient for CountingClient {
        async fn login(&self) -> Result<(), ForumError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_login {
                Err(ForumError::Auth("bad password".into()))
            } else {
                Ok(())
            }
        }

        async fn fetch_new_posts(&self, _forum_id: &str) -> Result<Vec<ForumPost>, ForumError> {
            Ok(Vec::new())
        }

        async fn post_reply(
            &self,
            _thread_id: &str,
            _content: &str,
            _attachments: &[String],
        ) -> Result<bool, ForumError> {
            Ok(true)
        }
    }

    fn forum(name: &str) -> ForumConfig {
        ForumConfig {
            name: name.into(),
            base_url: "http://127.0.0.1:1".into(),
            forum_id: "2".into(),
            username: "u".into(),
            password: "p".into(),
            poll_interval_secs: 10,
            enabled: true,
            task_priority: Default::default(),
        }
    }

    fn hub(fail_login: bool) -> (Arc<ForumHub>, Arc<CountingClient>, Arc<AtomicUsize>) {
        let client = Arc::new(CountingClient {
            logins: AtomicUsize::new(0),
            fail_login,
        });
        let built = Arc::new(AtomicUsize::new(0));
        let factory: ClientFactory = {
            let client = Arc::clone(&client);
            let built = Arc::clone(&built);
            Arc::new(move |_cfg: &ForumConfig| -> Result<Arc<dyn ForumClient>, RelayError> {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&client) as Arc<dyn ForumClient>)
            })
        };
        (Arc::new(ForumHub::new([forum("main")], factory)), client, built)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_client() {
        let (hub, _client, built) = hub(false);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move { hub.client("main").await.map(|_| ()) })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn racing_logins_perform_one_attempt() {
        let (hub, client, _) = hub(false);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move { hub.login("main").await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(client.logins.load(Ordering::SeqCst), 1);
        assert!(hub.is_logged_in("main").await);
    }

    #[tokio::test]
    async fn failed_login_surfaces_to_all_waiters_and_is_not_looped() {
        let (hub, client, _) = hub(true);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move { hub.login("main").await })
            })
            .collect();
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(RelayError::Auth { .. })));
        }
        assert_eq!(client.logins.load(Ordering::SeqCst), 1);

        // The next explicit call makes a fresh attempt.
        assert!(hub.login("main").await.is_err());
        assert_eq!(client.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_requires_login() {
        let (hub, _, _) = hub(false);
        assert!(matches!(
            hub.fetch_new_posts("main").await,
            Err(RelayError::Auth { .. })
        ));
        hub.login("main").await.unwrap();
        assert!(hub.fetch_new_posts("main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_forum_is_a_config_error() {
        let (hub, _, _) = hub(false);
        assert!(matches!(hub.client("nope").await, Err(RelayError::Config(_))));
    }
}
