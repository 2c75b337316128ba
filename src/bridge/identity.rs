//! Identity mapping between Matrix users and Mattermost users.
//!
//! Matrix users are represented on Mattermost by puppet accounts the bridge
//! creates and logs in as. Mattermost users are represented on Matrix by
//! ghost users in the application service namespace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::config::Config;
use crate::mattermost::api::{Actor, MattermostApi, MattermostUser, NewUser};
use crate::matrix::api::{MatrixApi, USER_IN_USE};
use crate::store::{UserRecord, UserTable};

const USERNAME_EXISTS: &str = "app.user.save.username_exists.app_error";
const MAX_USERNAME_LEN: usize = 22;

/// The Mattermost account standing in for a Matrix user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puppet {
    pub matrix_user_id: String,
    pub mattermost_user_id: String,
    pub access_token: String,
}

impl Puppet {
    pub fn actor(&self) -> Actor {
        Actor::puppet(&self.mattermost_user_id, &self.access_token)
    }
}

/// The ghost user namespace on the Matrix side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostNamespace {
    prefix: String,
    server_name: String,
}

impl GhostNamespace {
    pub fn new(prefix: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            server_name: server_name.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.matrix.ghost_prefix, &config.matrix.server_name)
    }

    pub fn localpart(&self, mattermost_user_id: &str) -> String {
        format!("{}{}", self.prefix, mattermost_user_id.to_lowercase())
    }

    pub fn ghost_id(&self, mattermost_user_id: &str) -> String {
        format!("@{}:{}", self.localpart(mattermost_user_id), self.server_name)
    }

    /// Returns true if `user_id` lives in the ghost namespace.
    pub fn is_ghost(&self, user_id: &str) -> bool {
        user_id.starts_with(&format!("@{}", self.prefix))
            && user_id.ends_with(&format!(":{}", self.server_name))
    }
}

/// Get-or-create mapping between the two platforms' users.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Mattermost puppet of a Matrix user, created when missing. With
    /// `persist` unset a newly created mapping is kept in memory only.
    async fn matrix_counterpart(&self, matrix_user_id: &str, persist: bool) -> Result<Puppet>;

    /// Known puppet of a Matrix user.
    async fn lookup_matrix_user(&self, matrix_user_id: &str) -> Result<Option<Puppet>>;

    /// Matrix ghost of a Mattermost user, created when missing.
    async fn mattermost_counterpart(&self, mattermost_user_id: &str, persist: bool)
        -> Result<String>;

    /// Known ghost of a Mattermost user.
    async fn lookup_mattermost_user(&self, mattermost_user_id: &str) -> Result<Option<String>>;

    /// False for Mattermost accounts that are puppets of Matrix users.
    async fn is_mattermost_user(&self, mattermost_user_id: &str) -> Result<bool>;

    /// Propagate a Mattermost profile change to the user's ghost.
    async fn update_profile(&self, user: &MattermostUser) -> Result<()>;
}

#[derive(Default)]
struct Cache {
    by_matrix: HashMap<String, UserRecord>,
    by_mattermost: HashMap<String, UserRecord>,
}

impl Cache {
    fn insert(&mut self, record: UserRecord) {
        self.by_matrix
            .insert(record.matrix_user_id.clone(), record.clone());
        self.by_mattermost
            .insert(record.mattermost_user_id.clone(), record);
    }
}

/// Identity resolver backed by the `users` table.
pub struct UserDirectory {
    users: UserTable,
    mattermost: Arc<dyn MattermostApi>,
    matrix: Arc<dyn MatrixApi>,
    namespace: GhostNamespace,
    puppet_prefix: String,
    email_domain: String,
    cache: Mutex<Cache>,
    creating: tokio::sync::Mutex<()>,
}

impl UserDirectory {
    pub fn new(
        users: UserTable,
        mattermost: Arc<dyn MattermostApi>,
        matrix: Arc<dyn MatrixApi>,
        namespace: GhostNamespace,
        puppet_prefix: impl Into<String>,
        email_domain: impl Into<String>,
    ) -> Result<Self> {
        let mut cache = Cache::default();
        for record in users.all()? {
            cache.insert(record);
        }
        info!(
            "Loaded {} bridged identities",
            cache.by_mattermost.len()
        );

        Ok(Self {
            users,
            mattermost,
            matrix,
            namespace,
            puppet_prefix: puppet_prefix.into(),
            email_domain: email_domain.into(),
            cache: Mutex::new(cache),
            creating: tokio::sync::Mutex::new(()),
        })
    }

    fn cached_by_matrix(&self, matrix_user_id: &str) -> Result<Option<UserRecord>> {
        let cache = self.cache.lock().map_err(|_| anyhow!("identity cache poisoned"))?;
        Ok(cache.by_matrix.get(matrix_user_id).cloned())
    }

    fn cached_by_mattermost(&self, mattermost_user_id: &str) -> Result<Option<UserRecord>> {
        let cache = self.cache.lock().map_err(|_| anyhow!("identity cache poisoned"))?;
        Ok(cache.by_mattermost.get(mattermost_user_id).cloned())
    }

    fn remember(&self, record: UserRecord, persist: bool) -> Result<()> {
        if persist {
            self.users.insert(&record)?;
        }
        let mut cache = self.cache.lock().map_err(|_| anyhow!("identity cache poisoned"))?;
        cache.insert(record);
        Ok(())
    }

    async fn create_puppet(&self, matrix_user_id: &str) -> Result<UserRecord> {
        let display_name = match self.matrix.display_name(matrix_user_id).await {
            Ok(name) => name,
            Err(e) => {
                debug!("No display name for {}: {}", matrix_user_id, e);
                None
            }
        };

        let username = puppet_username(&self.puppet_prefix, matrix_user_id);
        let mut new_user = NewUser {
            email: format!("{}@{}", username, self.email_domain),
            username,
            password: random_password(),
            first_name: display_name.clone().unwrap_or_default(),
        };
        let user = match self.mattermost.create_user(&new_user).await {
            Ok(user) => user,
            Err(e) if e.is_code(USERNAME_EXISTS) => {
                new_user.username = with_suffix(&new_user.username);
                new_user.email = format!("{}@{}", new_user.username, self.email_domain);
                self.mattermost.create_user(&new_user).await?
            }
            Err(e) => return Err(e.into()),
        };
        let token = self
            .mattermost
            .create_token(&user.id, "matterlink puppet")
            .await?;

        info!(
            "Created Mattermost puppet {} ({}) for {}",
            new_user.username, user.id, matrix_user_id
        );
        Ok(UserRecord {
            mattermost_user_id: user.id,
            matrix_user_id: matrix_user_id.to_string(),
            access_token: Some(token),
            is_matrix_user: true,
            display_name,
        })
    }

    async fn create_ghost(&self, mattermost_user_id: &str) -> Result<UserRecord> {
        let ghost = self.namespace.ghost_id(mattermost_user_id);
        match self
            .matrix
            .register(&self.namespace.localpart(mattermost_user_id))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_code(USER_IN_USE) => debug!("Ghost {} already registered", ghost),
            Err(e) => return Err(e.into()),
        }

        let user = self.mattermost.user(mattermost_user_id).await?;
        let display_name = user.display_name();
        self.matrix
            .set_display_name(&ghost, &ghost_display_name(&display_name))
            .await?;

        info!("Registered Matrix ghost {} for {}", ghost, mattermost_user_id);
        Ok(UserRecord {
            mattermost_user_id: mattermost_user_id.to_string(),
            matrix_user_id: ghost,
            access_token: None,
            is_matrix_user: false,
            display_name: Some(display_name),
        })
    }
}

fn as_puppet(record: UserRecord) -> Result<Puppet> {
    let token = record
        .access_token
        .ok_or_else(|| anyhow!("puppet of {} has no access token", record.matrix_user_id))?;
    Ok(Puppet {
        matrix_user_id: record.matrix_user_id,
        mattermost_user_id: record.mattermost_user_id,
        access_token: token,
    })
}

#[async_trait]
impl IdentityResolver for UserDirectory {
    async fn matrix_counterpart(&self, matrix_user_id: &str, persist: bool) -> Result<Puppet> {
        if let Some(record) = self.cached_by_matrix(matrix_user_id)? {
            if !record.is_matrix_user {
                bail!("{} is a ghost, not a Matrix user", matrix_user_id);
            }
            return as_puppet(record);
        }

        let _guard = self.creating.lock().await;
        if let Some(record) = self.cached_by_matrix(matrix_user_id)? {
            return as_puppet(record);
        }
        let record = self.create_puppet(matrix_user_id).await?;
        self.remember(record.clone(), persist)?;
        as_puppet(record)
    }

    async fn lookup_matrix_user(&self, matrix_user_id: &str) -> Result<Option<Puppet>> {
        match self.cached_by_matrix(matrix_user_id)? {
            Some(record) if record.is_matrix_user => Ok(Some(as_puppet(record)?)),
            _ => Ok(None),
        }
    }

    async fn mattermost_counterpart(
        &self,
        mattermost_user_id: &str,
        persist: bool,
    ) -> Result<String> {
        if let Some(record) = self.cached_by_mattermost(mattermost_user_id)? {
            if record.is_matrix_user {
                bail!("{} is a puppet, not a Mattermost user", mattermost_user_id);
            }
            return Ok(record.matrix_user_id);
        }

        let _guard = self.creating.lock().await;
        if let Some(record) = self.cached_by_mattermost(mattermost_user_id)? {
            return Ok(record.matrix_user_id);
        }
        let record = self.create_ghost(mattermost_user_id).await?;
        let ghost = record.matrix_user_id.clone();
        self.remember(record, persist)?;
        Ok(ghost)
    }

    async fn lookup_mattermost_user(&self, mattermost_user_id: &str) -> Result<Option<String>> {
        Ok(self
            .cached_by_mattermost(mattermost_user_id)?
            .filter(|record| !record.is_matrix_user)
            .map(|record| record.matrix_user_id))
    }

    async fn is_mattermost_user(&self, mattermost_user_id: &str) -> Result<bool> {
        Ok(!self
            .cached_by_mattermost(mattermost_user_id)?
            .is_some_and(|record| record.is_matrix_user))
    }

    async fn update_profile(&self, user: &MattermostUser) -> Result<()> {
        let Some(record) = self.cached_by_mattermost(&user.id)? else {
            return Ok(());
        };
        if record.is_matrix_user {
            return Ok(());
        }

        let display_name = user.display_name();
        if record.display_name.as_deref() == Some(display_name.as_str()) {
            return Ok(());
        }

        self.matrix
            .set_display_name(&record.matrix_user_id, &ghost_display_name(&display_name))
            .await?;
        self.users.set_display_name(&user.id, &display_name)?;

        let mut updated = record;
        updated.display_name = Some(display_name);
        let mut cache = self.cache.lock().map_err(|_| anyhow!("identity cache poisoned"))?;
        cache.insert(updated);
        Ok(())
    }
}

/// Display name of the ghost of a Mattermost user.
pub fn ghost_display_name(display_name: &str) -> String {
    format!("{} [mm]", display_name)
}

/// Mattermost username for the puppet of a Matrix user: the prefix plus
/// the sanitized localpart, within Mattermost's length limit.
fn puppet_username(prefix: &str, matrix_user_id: &str) -> String {
    let localpart = matrix_user_id
        .trim_start_matches('@')
        .split(':')
        .next()
        .unwrap_or_default();
    let sanitized: String = localpart
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", prefix, sanitized)
        .chars()
        .take(MAX_USERNAME_LEN)
        .collect()
}

fn with_suffix(username: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    let base: String = username.chars().take(MAX_USERNAME_LEN - 5).collect();
    format!("{}_{}", base, suffix)
}

fn random_password() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}Aa1!", random)
}
