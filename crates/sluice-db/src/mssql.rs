use crate::driver::{detect_driver, parse_conn_url};
use crate::DbError;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub(crate) type MssqlClient = Client<Compat<TcpStream>>;

pub(crate) async fn connect(conn_str: &str) -> Result<MssqlClient, DbError> {
    detect_driver(conn_str)?;
    let spec = parse_conn_url(conn_str)?;

    let mut config = Config::new();
    config.host(&spec.host);
    config.port(spec.port);
    if !spec.user.is_empty() {
        config.authentication(AuthMethod::sql_server(&spec.user, &spec.password));
    }
    if let Some(database) = &spec.database {
        config.database(database);
    }
    config.trust_cert();

    let addr = config.get_addr();
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|source| DbError::Connect { addr, source })?;
    tcp.set_nodelay(true)?;

    Ok(Client::connect(config, tcp.compat_write()).await?)
}

/// Executes an entire SQL file as a single batch and returns the number of
/// affected rows.
pub async fn execute_batch(conn_str: &str, sql: &str) -> Result<u64, DbError> {
    let mut client = connect(conn_str).await?;
    let result = client.execute(sql, &[]).await?;
    Ok(result.total())
}
