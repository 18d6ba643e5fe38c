use crate::{ConnectionError, ConnectionResult, Queryable, ResultSet, Value};
use tiberius::{Client, ColumnData, Config, FromSql, ToSql};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::trace;

type TdsClient = Client<Compat<TcpStream>>;

/// A live SQL Server connection.
///
/// The TDS client requires exclusive access per roundtrip, so the client is
/// kept behind an async mutex and the `Queryable` surface takes `&self`.
pub struct MssqlConnection {
    client: Mutex<TdsClient>,
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection").finish_non_exhaustive()
    }
}

impl MssqlConnection {
    /// Opens a connection from an ADO.NET-style connection string.
    pub async fn connect(connection_string: &str) -> ConnectionResult<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| ConnectionError::InvalidConnectionString(e.to_string()))?;

        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write()).await?;

        Ok(MssqlConnection {
            client: Mutex::new(client),
        })
    }
}

#[async_trait::async_trait]
impl Queryable for MssqlConnection {
    async fn query_raw(&self, sql: &str, params: &[Value]) -> ConnectionResult<ResultSet> {
        trace!(sql, "query_raw");

        let mut client = self.client.lock().await;
        let tds_params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let stream = client.query(sql, &tds_params).await?;
        let rows = stream.into_first_result().await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_owned()).collect())
            .unwrap_or_default();

        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(column_data_to_value).collect())
            .collect();

        Ok(ResultSet::new(columns, rows))
    }

    async fn execute_raw(&self, sql: &str, params: &[Value]) -> ConnectionResult<u64> {
        trace!(sql, "execute_raw");

        let mut client = self.client.lock().await;
        let tds_params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let result = client.execute(sql, &tds_params).await?;

        Ok(result.rows_affected().iter().sum())
    }

    async fn raw_cmd(&self, sql: &str) -> ConnectionResult<()> {
        trace!(sql, "raw_cmd");

        let mut client = self.client.lock().await;
        client.simple_query(sql).await?.into_results().await?;

        Ok(())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Value::Null => ColumnData::String(None),
            Value::Int32(i) => ColumnData::I32(Some(*i)),
            Value::Int64(i) => ColumnData::I64(Some(*i)),
            Value::Double(f) => ColumnData::F64(Some(*f)),
            Value::Boolean(b) => ColumnData::Bit(Some(*b)),
            Value::Text(s) => ColumnData::String(Some(s.as_str().into())),
            Value::Bytes(b) => ColumnData::Binary(Some(b.as_slice().into())),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            Value::DateTime(dt) => dt.to_sql(),
        }
    }
}

fn column_data_to_value(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(Some(i)) => Value::Int32(i32::from(i)),
        ColumnData::I16(Some(i)) => Value::Int32(i32::from(i)),
        ColumnData::I32(Some(i)) => Value::Int32(i),
        ColumnData::I64(Some(i)) => Value::Int64(i),
        ColumnData::F32(Some(f)) => Value::Double(f64::from(f)),
        ColumnData::F64(Some(f)) => Value::Double(f),
        ColumnData::Bit(Some(b)) => Value::Boolean(b),
        ColumnData::String(Some(s)) => Value::Text(s.into_owned()),
        ColumnData::Binary(Some(b)) => Value::Bytes(b.into_owned()),
        ColumnData::Guid(Some(u)) => Value::Uuid(u),
        ColumnData::Numeric(Some(n)) => {
            Value::Double(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }
        ref temporal @ (ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_))
        | ColumnData::DateTimeOffset(Some(_))) => chrono::NaiveDateTime::from_sql(temporal)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
