use gpumon_core::{AgentConfig, GpumonError, Result};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

/// InfluxDB 1.x HTTP API client: database creation and line protocol writes.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    query_url: String,
    write_url: String,
    database: String,
    create_statement: String,
}

impl InfluxSink {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| GpumonError::Http(e.to_string()))?;

        Ok(Self {
            client,
            query_url: config.query_url(),
            write_url: config.write_url(),
            database: config.database.clone(),
            create_statement: config.create_database_statement(),
        })
    }

    /// `CREATE DATABASE` is a no-op when the database already exists.
    #[instrument(skip(self), fields(url = %self.query_url, db = %self.database))]
    pub async fn ensure_database(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.query_url)
            .query(&[("q", self.create_statement.as_str())])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = check_status(response).await?;
        debug!(%body, "Database ensured");
        Ok(())
    }

    /// Send one multi-line payload. Empty payloads are not sent.
    #[instrument(skip(self, payload), fields(url = %self.write_url, db = %self.database, lines = tracing::field::Empty))]
    pub async fn write(&self, payload: &str) -> Result<()> {
        if payload.is_empty() {
            debug!("Nothing to write");
            return Ok(());
        }
        tracing::Span::current().record("lines", payload.lines().count());
        debug!(%payload, "Posting points");

        let response = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.database.as_str())])
            .header(CONTENT_TYPE, "text/plain")
            .body(payload.to_owned())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(GpumonError::SinkStatus {
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }

    Ok(body)
}

fn map_reqwest_error(e: reqwest::Error) -> GpumonError {
    if e.is_timeout() {
        return GpumonError::SinkTimeout;
    }
    GpumonError::Http(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sink_for(server: &mockito::Server) -> InfluxSink {
        InfluxSink::new(&AgentConfig::new(server.url(), "node-1")).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_database() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "CREATE DATABASE GPU".into(),
            ))
            .with_status(200)
            .with_body(r#"{"results":[{"statement_id":0}]}"#)
            .create_async()
            .await;

        sink_for(&server).ensure_database().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_database_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let err = sink_for(&server).ensure_database().await.unwrap_err();
        assert!(matches!(err, GpumonError::SinkStatus { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_write_posts_payload() {
        let payload = "gpu,hostname=node-1,gpuid=0,product=Tesla%20K80,minor=0 value=83 1\n\
                       gpu/encoder,hostname=node-1,gpuid=0,product=Tesla%20K80,minor=0 value=0 1";

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::UrlEncoded("db".into(), "GPU".into()))
            .match_header("content-type", "text/plain")
            .match_body(payload)
            .with_status(204)
            .create_async()
            .await;

        sink_for(&server).write(payload).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("{\"error\":\"engine down\"}")
            .create_async()
            .await;

        let err = sink_for(&server).write("gpu value=1 1").await.unwrap_err();
        match err {
            GpumonError::SinkStatus { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("engine down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_payload_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        sink_for(&server).write("").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        // Accepts the connection but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut config = AgentConfig::new(format!("http://{}", addr), "node-1");
        config.http_timeout = Duration::from_millis(100);
        let sink = InfluxSink::new(&config).unwrap();

        let err = sink.write("gpu value=1 1").await.unwrap_err();
        assert!(matches!(err, GpumonError::SinkTimeout), "got {:?}", err);
        assert!(err.is_timeout());
        assert_eq!(err.category(), "network");

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Nothing listens on port 9 on loopback in test environments.
        let mut config = AgentConfig::new("http://127.0.0.1:9", "node-1");
        config.http_timeout = Duration::from_secs(2);
        let sink = InfluxSink::new(&config).unwrap();

        let err = sink.write("gpu value=1 1").await.unwrap_err();
        assert_eq!(err.category(), "network");
    }
}
