use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::StoreSink;
use crate::{
    dsn::Dsn,
    errors::{KiIngestorError, RemoteWriteError},
    record::SeriesWrite,
    Result,
};

/// Writes points through the InfluxDB 0.8 series API,
/// `POST /db/<database>/series?u=<user>&p=<password>`.
pub struct InfluxSink {
    client: Client,
    url: String,
    query: Vec<(String, String)>,
}

#[derive(Serialize)]
struct SeriesBody<'a> {
    name: &'a str,
    columns: &'a [String],
    points: [&'a [Value]; 1],
}

impl InfluxSink {
    pub fn try_new(dsn: &Dsn) -> Result<Self> {
        let scheme = match dsn.transport.as_str() {
            "tcp" | "http" => "http",
            "https" => "https",
            other => return Err(KiIngestorError::UnsupportedTransport(other.to_owned())),
        };

        let mut builder = Client::builder();
        if !dsn.dial_timeout.is_zero() {
            builder = builder.connect_timeout(dsn.dial_timeout);
        }

        let mut query = Vec::new();
        if let Some(user) = &dsn.user {
            query.push(("u".to_owned(), user.clone()));
        }
        if let Some(password) = &dsn.password {
            query.push(("p".to_owned(), password.clone()));
        }
        query.extend(
            dsn.store_params()
                .map(|(k, v)| (k.to_owned(), v.to_owned())),
        );

        Ok(Self {
            client: builder.build()?,
            url: format!("{scheme}://{}/db/{}/series", dsn.address, dsn.database),
            query,
        })
    }
}

#[async_trait]
impl StoreSink for InfluxSink {
    async fn write_series(&self, write: &SeriesWrite) -> core::result::Result<(), RemoteWriteError> {
        let body = [SeriesBody {
            name: &write.series,
            columns: &write.point.columns,
            points: [write.point.values.as_slice()],
        }];

        let response = self
            .client
            .post(&self.url)
            .query(&self.query)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteWriteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
