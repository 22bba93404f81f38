use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigKey, ConfigStore, JsonFileStore, ModelConfig};
use crate::error::RewriteError;

use super::asset::StorageGate;
use super::events::{DownloadEvent, DownloadListener};

const USER_AGENT: &str = "RefineLocal/0.1";

/// Downloads the model artifact into a temp file and atomically installs it.
///
/// At most one session runs at a time. There is no resume support: every
/// session starts from a clean slate, deleting corrupt remnants and stale
/// temp files first.
pub struct DownloadManager {
    config: ModelConfig,
    gate: StorageGate,
    settings: Arc<JsonFileStore>,
    client: reqwest::Client,
    /// Cancellation token for the active session, if any.
    session: Mutex<Option<CancellationToken>>,
}

impl DownloadManager {
    pub fn new(config: ModelConfig, settings: Arc<JsonFileStore>) -> Self {
        let gate = StorageGate::new(config.clone());
        Self {
            config,
            gate,
            settings,
            client: reqwest::Client::new(),
            session: Mutex::new(None),
        }
    }

    /// Whether a download session is currently active.
    pub fn is_downloading(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Download the artifact, reporting progress and exactly one terminal
    /// event through `listener`. A no-op completion when a valid artifact is
    /// already installed. Cancellation produces no terminal event.
    pub async fn download(&self, listener: &dyn DownloadListener) -> Result<(), RewriteError> {
        // Idempotent when the artifact is already valid.
        if self.gate.is_asset_valid() {
            info!("Model already downloaded and valid");
            listener.on_event(DownloadEvent::Complete {
                file_path: self.config.model_path(),
            });
            return Ok(());
        }

        if !self.gate.has_sufficient_storage(self.config.required_storage_mb) {
            let err = RewriteError::StorageInsufficient {
                required_mb: self.config.required_storage_mb,
            };
            listener.on_event(DownloadEvent::Error {
                message: err.user_message(),
            });
            return Err(err);
        }

        let token = CancellationToken::new();
        {
            let mut session = self.session.lock().unwrap();
            if session.is_some() {
                warn!("Download requested while another session is active");
                return Err(RewriteError::DownloadInProgress);
            }
            *session = Some(token.clone());
        }

        let result = self.run_session(&token, listener).await;
        *self.session.lock().unwrap() = None;

        match result {
            Ok(()) => {
                if let Err(e) = self.settings.set(&ConfigKey::MODEL_DOWNLOADED, true) {
                    warn!("Could not persist download hint: {}", e);
                }
                info!("Download complete: {:?}", self.config.model_path());
                listener.on_event(DownloadEvent::Complete {
                    file_path: self.config.model_path(),
                });
                Ok(())
            }
            Err(RewriteError::Cancelled) => {
                // A cancelled session reports nothing: the cancel was the answer.
                info!("Download cancelled");
                Err(RewriteError::Cancelled)
            }
            Err(err) => {
                listener.on_event(DownloadEvent::Error {
                    message: err.user_message(),
                });
                Err(err)
            }
        }
    }

    /// Cancel the in-flight session, if any. An active session deletes its
    /// own temp file when it observes the cancellation; with no session, any
    /// stale temp file is removed here.
    pub fn cancel_download(&self) {
        let session = self.session.lock().unwrap();
        match session.as_ref() {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for model download");
            }
            None => {
                let _ = std::fs::remove_file(self.config.temp_path());
                info!("No active download to cancel");
            }
        }
    }

    async fn run_session(
        &self,
        token: &CancellationToken,
        listener: &dyn DownloadListener,
    ) -> Result<(), RewriteError> {
        let temp_path = self.config.temp_path();
        let result = self.stream_to_temp(token, listener, &temp_path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn stream_to_temp(
        &self,
        token: &CancellationToken,
        listener: &dyn DownloadListener,
        temp_path: &PathBuf,
    ) -> Result<(), RewriteError> {
        tokio::fs::create_dir_all(&self.config.model_dir)
            .await
            .map_err(|e| RewriteError::Save(format!("Failed to create model directory: {}", e)))?;

        // Clean slate: drop corrupt remnants and stale temp files. No resume.
        let final_path = self.config.model_path();
        if final_path.exists() && !self.gate.is_asset_valid() {
            info!("Deleting corrupted model file before download");
            let _ = tokio::fs::remove_file(&final_path).await;
        }
        let _ = tokio::fs::remove_file(temp_path).await;

        info!("Starting download from {}", self.config.download_url);

        let request = self
            .client
            .get(&self.config.download_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);

        let response = tokio::select! {
            _ = token.cancelled() => return Err(RewriteError::Cancelled),
            resp = request.send() => resp.map_err(|e| RewriteError::Network(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => RewriteError::SourceNotFound,
                403 => RewriteError::SourceAccessDenied,
                code => RewriteError::SourceServerError(code),
            });
        }

        let total_bytes = response.content_length().filter(|len| *len > 0);
        info!(
            "Download starting, total size: {}",
            total_bytes
                .map(|b| format!("{} MB", b / (1024 * 1024)))
                .unwrap_or_else(|| "unknown".to_string())
        );

        let file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| RewriteError::Save(format!("Failed to create temp file: {}", e)))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let mut stream = response.bytes_stream();
        let mut transferred: u64 = 0;
        let mut last_percent: Option<i32> = None;

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(RewriteError::Cancelled),
                next = stream.next() => match next {
                    Some(chunk) => chunk.map_err(|e| RewriteError::Network(e.to_string()))?,
                    None => break,
                },
            };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| RewriteError::Save(format!("Failed to write chunk: {}", e)))?;
            transferred += chunk.len() as u64;

            // Whole-percent deduplication, -1 while the total is unknown.
            let percent = match total_bytes {
                Some(total) => ((transferred * 100) / total) as i32,
                None => -1,
            };
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                listener.on_event(DownloadEvent::Progress {
                    bytes_downloaded: transferred,
                    total_bytes,
                    percent,
                });
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| RewriteError::Save(format!("Failed to flush temp file: {}", e)))?;
        let file = writer.into_inner();
        let _ = file.sync_all().await;
        drop(file);

        // A short file means the transfer ended early even though the stream
        // closed cleanly. Not retried automatically.
        if transferred < self.config.min_valid_size_bytes {
            warn!("Downloaded file too small: {} bytes", transferred);
            return Err(RewriteError::Integrity {
                actual: transferred,
                required: self.config.min_valid_size_bytes,
            });
        }

        // Atomic install: no window where a partial file is visible at the
        // final path.
        tokio::fs::rename(temp_path, &final_path)
            .await
            .map_err(|e| RewriteError::Save(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Collector(Mutex<Vec<DownloadEvent>>);

    impl DownloadListener for Collector {
        fn on_event(&self, event: DownloadEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Collector {
        fn events(&self) -> Vec<DownloadEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    fn manager(dir: &std::path::Path, url: String, threshold: u64) -> DownloadManager {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = ModelConfig::new(dir);
        config.download_url = url;
        config.min_valid_size_bytes = threshold;
        // Keep the storage preflight permissive in tests.
        config.required_storage_mb = 0;
        let settings = Arc::new(JsonFileStore::new(dir.join("settings.json")));
        DownloadManager::new(config, settings)
    }

    async fn serve_body(body: Vec<u8>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
        server
    }

    fn is_terminal(event: &DownloadEvent) -> bool {
        matches!(
            event,
            DownloadEvent::Complete { .. } | DownloadEvent::Error { .. }
        )
    }

    #[tokio::test]
    async fn valid_asset_completes_without_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:1/unreachable".to_string(), 10);
        std::fs::write(mgr.config.model_path(), vec![0u8; 10]).unwrap();

        let listener = Collector::default();
        mgr.download(&listener).await.unwrap();

        assert_eq!(
            listener.events(),
            vec![DownloadEvent::Complete {
                file_path: mgr.config.model_path()
            }]
        );
    }

    #[tokio::test]
    async fn successful_download_installs_artifact() {
        let server = serve_body(vec![7u8; 1000]).await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("{}/model.bin", server.uri()), 500);

        let listener = Collector::default();
        mgr.download(&listener).await.unwrap();

        assert!(mgr.config.model_path().exists());
        assert!(!mgr.config.temp_path().exists());
        assert_eq!(std::fs::metadata(mgr.config.model_path()).unwrap().len(), 1000);

        let events = listener.events();
        let terminal: Vec<_> = events.iter().filter(|e| is_terminal(e)).collect();
        assert_eq!(terminal.len(), 1, "exactly one terminal event");
        assert!(matches!(events.last(), Some(DownloadEvent::Complete { .. })));

        // Progress percents are non-decreasing and deduplicated.
        let percents: Vec<i32> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn corrupt_remnant_is_replaced() {
        let server = serve_body(vec![1u8; 600]).await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("{}/model.bin", server.uri()), 500);

        // Below-threshold remnant must be deleted, not resumed.
        std::fs::write(mgr.config.model_path(), vec![0u8; 50]).unwrap();

        let listener = Collector::default();
        mgr.download(&listener).await.unwrap();
        assert_eq!(std::fs::metadata(mgr.config.model_path()).unwrap().len(), 600);
    }

    #[tokio::test]
    async fn undersized_body_reports_incomplete_download() {
        let server = serve_body(vec![1u8; 100]).await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("{}/model.bin", server.uri()), 500);

        let listener = Collector::default();
        let err = mgr.download(&listener).await.unwrap_err();

        assert_eq!(
            err,
            RewriteError::Integrity {
                actual: 100,
                required: 500
            }
        );
        assert!(!mgr.config.model_path().exists());
        assert!(!mgr.config.temp_path().exists());

        let events = listener.events();
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn http_status_is_classified() {
        for (code, expected) in [
            (404, RewriteError::SourceNotFound),
            (403, RewriteError::SourceAccessDenied),
            (500, RewriteError::SourceServerError(500)),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/model.bin"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let mgr = manager(dir.path(), format!("{}/model.bin", server.uri()), 500);
            let listener = Collector::default();
            let err = mgr.download(&listener).await.unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(
                listener.events(),
                vec![DownloadEvent::Error {
                    message: expected.user_message()
                }]
            );
        }
    }

    #[tokio::test]
    async fn mid_stream_failure_cleans_up_and_reports_once() {
        // Minimal HTTP server that promises 1000 bytes, sends 100, then drops
        // the connection.
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = tcp.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\n")
                .await
                .unwrap();
            sock.write_all(&[9u8; 100]).await.unwrap();
            sock.flush().await.unwrap();
            // Dropping the socket here aborts the transfer mid-body.
        });

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("http://{}/model.bin", addr), 500);
        let listener = Collector::default();
        let err = mgr.download(&listener).await.unwrap_err();

        assert!(matches!(err, RewriteError::Network(_)), "got {:?}", err);
        assert!(!mgr.config.model_path().exists());
        assert!(!mgr.config.temp_path().exists());

        let events = listener.events();
        let terminal: Vec<_> = events.iter().filter(|e| is_terminal(e)).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], DownloadEvent::Error { .. }));
    }

    #[tokio::test]
    async fn unknown_total_reports_indeterminate_progress_once() {
        // HTTP server that declares no content-length; closing the connection
        // is what ends the body.
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = tcp.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            sock.write_all(&[3u8; 600]).await.unwrap();
            sock.flush().await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("http://{}/model.bin", addr), 500);
        let listener = Collector::default();
        mgr.download(&listener).await.unwrap();

        // Percent is pinned at -1 with no total, so deduplication collapses
        // all chunks into a single progress event.
        let events = listener.events();
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress {
                    percent,
                    total_bytes,
                    ..
                } => Some((*percent, *total_bytes)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(-1, None)]);
        assert!(matches!(events.last(), Some(DownloadEvent::Complete { .. })));
        assert_eq!(std::fs::metadata(mgr.config.model_path()).unwrap().len(), 600);
    }

    #[tokio::test]
    async fn insufficient_storage_fails_before_any_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ModelConfig::new(dir.path());
        config.download_url = "http://127.0.0.1:1/unreachable".to_string();
        config.min_valid_size_bytes = 500;
        config.required_storage_mb = u64::MAX;
        let settings = Arc::new(JsonFileStore::new(dir.path().join("settings.json")));
        let mgr = DownloadManager::new(config, settings);

        let listener = Collector::default();
        let err = mgr.download(&listener).await.unwrap_err();

        assert_eq!(
            err,
            RewriteError::StorageInsufficient {
                required_mb: u64::MAX
            }
        );
        assert_eq!(
            listener.events(),
            vec![DownloadEvent::Error {
                message: err.user_message()
            }]
        );
        // The URL is unreachable; a started transfer would have surfaced a
        // network error and left a temp file behind.
        assert!(!mgr.config.temp_path().exists());
    }

    #[test]
    fn cancel_with_no_session_removes_stale_temp() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:1/unreachable".to_string(), 500);
        std::fs::write(mgr.config.temp_path(), b"stale").unwrap();

        mgr.cancel_download();
        assert!(!mgr.config.temp_path().exists());
        assert!(!mgr.is_downloading());
    }

    #[tokio::test]
    async fn cancellation_suppresses_all_terminal_callbacks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 1000])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path(), format!("{}/model.bin", server.uri()), 500));
        let listener = Arc::new(Collector::default());

        let task = {
            let mgr = Arc::clone(&mgr);
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { mgr.download(listener.as_ref()).await })
        };

        // Let the session start, then cancel it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(mgr.is_downloading());
        mgr.cancel_download();

        let result = task.await.unwrap();
        assert_eq!(result.unwrap_err(), RewriteError::Cancelled);
        assert!(listener.events().is_empty(), "no callbacks after cancel");
        assert!(!mgr.config.temp_path().exists());
        assert!(!mgr.is_downloading());
    }

    #[tokio::test]
    async fn second_download_while_active_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 600])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path(), format!("{}/model.bin", server.uri()), 500));

        let first = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.download(&|_event: DownloadEvent| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = mgr.download(&|_event: DownloadEvent| {}).await;
        assert_eq!(second.unwrap_err(), RewriteError::DownloadInProgress);

        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn completion_sets_the_advisory_hint() {
        let server = serve_body(vec![1u8; 600]).await;
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), format!("{}/model.bin", server.uri()), 500);

        assert_eq!(mgr.settings.get(&ConfigKey::MODEL_DOWNLOADED), None);
        mgr.download(&|_event: DownloadEvent| {}).await.unwrap();
        assert_eq!(mgr.settings.get(&ConfigKey::MODEL_DOWNLOADED), Some(true));
    }
}
