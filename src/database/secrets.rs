use async_trait::async_trait;

use crate::database::manager::DatabaseError;

/// Secret names the deployment stores database credentials under.
pub const DB_HOST: &str = "db-host";
pub const DB_PORT: &str = "db-port";
pub const DB_NAME: &str = "db-name";
pub const DB_USERNAME: &str = "db-username";
pub const DB_PASSWORD: &str = "db-password";

/// Source of named secrets. A vault client implements this in deployments
/// that do not inject credentials through the environment.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String, DatabaseError>;
}

/// Reads `db-host` from `DB_HOST`, `db-username` from `DB_USERNAME`, and so on.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn env_name(secret: &str) -> String {
        secret.replace('-', "_").to_ascii_uppercase()
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, DatabaseError> {
        std::env::var(Self::env_name(name)).map_err(|_| DatabaseError::SecretMissing(name.to_string()))
    }
}

#[derive(Clone)]
pub struct DatabaseSecrets {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DatabaseSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSecrets")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl DatabaseSecrets {
    pub async fn load(store: &dyn SecretStore) -> Result<Self, DatabaseError> {
        let port = store.get_secret(DB_PORT).await?;
        Ok(Self {
            host: store.get_secret(DB_HOST).await?,
            port: port
                .trim()
                .parse()
                .map_err(|_| DatabaseError::InvalidSecret(DB_PORT.to_string()))?,
            name: store.get_secret(DB_NAME).await?,
            username: store.get_secret(DB_USERNAME).await?,
            password: store.get_secret(DB_PASSWORD).await?,
        })
    }

    /// Build a postgres URL; credentials are percent-encoded by `url`.
    pub fn connection_url(&self) -> Result<String, DatabaseError> {
        let mut url = url::Url::parse("postgres://localhost").map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_host(Some(&self.host)).map_err(|_| DatabaseError::InvalidSecret(DB_HOST.to_string()))?;
        url.set_port(Some(self.port)).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_username(&self.username).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_password(Some(&self.password)).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_path(&format!("/{}", self.name));
        Ok(url.into())
    }
}
