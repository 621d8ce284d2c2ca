//! Opening SQL Server sessions

use async_trait::async_trait;
use batchql_core::{Backend, DriverError, Session};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use crate::config::{MssqlConfig, ServerAddress};
use crate::error::map_error;
use crate::session::{MssqlSession, TdsClient};

/// Opens a new TCP connection for every session.
#[derive(Debug, Clone)]
pub struct MssqlBackend {
    config: MssqlConfig,
}

impl MssqlBackend {
    pub fn new(config: MssqlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MssqlConfig {
        &self.config
    }

    /// Connect to `address` with the configured credentials
    #[tracing::instrument(skip(self), fields(server = %address))]
    pub async fn connect(&self, address: ServerAddress) -> Result<MssqlSession, DriverError> {
        let config = self.tiberius_config(&address)?;
        let timeout = self.config.connect_timeout();

        let client = tokio::time::timeout(timeout, connect_client(config))
            .await
            .map_err(|_| {
                DriverError::Timeout(format!(
                    "connecting to {} took longer than {} s",
                    address,
                    timeout.as_secs()
                ))
            })??;

        tracing::debug!("connected to SQL Server");
        Ok(MssqlSession::new(client, address))
    }

    pub(crate) fn tiberius_config(&self, address: &ServerAddress) -> Result<Config, DriverError> {
        let mut config = Config::new();
        config.host(&address.host);
        config.port(address.port);
        config.application_name(&self.config.application_name);

        if let Some(database) = &self.config.database {
            config.database(database);
        }
        if self.config.trust_cert {
            config.trust_cert();
        }
        config.encryption(if self.config.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        match &self.config.username {
            Some(user) => {
                let password = self.config.password.as_deref().unwrap_or_default();
                config.authentication(AuthMethod::sql_server(user, password));
            }
            None => {
                #[cfg(windows)]
                {
                    config.authentication(AuthMethod::Integrated);
                }
                #[cfg(not(windows))]
                {
                    return Err(DriverError::Connection(
                        "Windows authentication is only supported on Windows; set a username"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(config)
    }
}

#[async_trait]
impl Backend for MssqlBackend {
    async fn open(&self, target: Option<&str>) -> Result<Box<dyn Session>, DriverError> {
        let address = self.config.address(target)?;
        let session = self.connect(address).await?;
        Ok(Box::new(session))
    }
}

async fn connect_client(config: Config) -> Result<TdsClient, DriverError> {
    let tcp = open_tcp(&config).await?;
    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        // Azure SQL gateways hand out the node to talk to
        Err(tiberius::error::Error::Routing { host, port }) => {
            tracing::debug!(%host, port, "following server redirect");
            let mut config = config;
            config.host(&host);
            config.port(port);
            let tcp = open_tcp(&config).await?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(map_error)
        }
        Err(err) => Err(map_error(err)),
    }
}

async fn open_tcp(config: &Config) -> Result<TcpStream, DriverError> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}
