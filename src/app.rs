use crate::completion::OpenAIClient;
use crate::config::{AppConfig, Credentials, HTTPConfig};
use crate::conversation::{ConversationRelay, SqliteConversationStore};
use crate::http::{create_app, HttpState};
use crate::messaging::{SignatureValidator, TwilioClient};
use crate::TracingReloadHandle;
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct AppHandles {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}
impl AppHandles {
    pub async fn new(
        config: AppConfig,
        credentials: Credentials,
        tracing_reload: TracingReloadHandle,
    ) -> Result<AppHandles> {
        let completer = Arc::new(OpenAIClient::new(
            &config.openai,
            credentials.openai_api_key.clone(),
        )?);
        let notifier = Arc::new(TwilioClient::new(
            &config.twilio,
            credentials.twilio_account_sid.clone(),
            credentials.twilio_auth_token.clone(),
        )?);

        let store = Arc::new(SqliteConversationStore::connect(&config.database).await?);
        info!(
            "Conversation database ready at {}",
            config.database.database_url
        );

        let relay = ConversationRelay::new(
            completer,
            store,
            notifier,
            config.openai.fallback_reply(),
        );

        let signature_validator = match config.twilio.webhook_url {
            Some(webhook_url) => {
                info!("Validating Twilio request signatures for {webhook_url}");
                Some(SignatureValidator::new(
                    credentials.twilio_auth_token.clone(),
                    webhook_url,
                ))
            }
            None => {
                warn!("twilio.webhook_url is not set, inbound webhooks are not signature checked!");
                None
            }
        };

        let state = HttpState {
            relay,
            signature_validator,
            tracing_reload: Some(tracing_reload),
        };
        let app = create_app(state, credentials.admin_token);

        let tasks = vec![
            ("HTTP Server", Self::start_http_server(config.http, app)),
            ("Shutdown Signal", Self::start_shutdown_signal()),
        ];
        Ok(AppHandles { tasks })
    }

    pub async fn run(self) {
        let abort_handles: Vec<_> = self
            .tasks
            .iter()
            .map(|(_, handle)| handle.abort_handle())
            .collect();

        let futures: Vec<_> = self
            .tasks
            .into_iter()
            .map(|(name, handle)| {
                info!("Starting task: {name}");
                Box::pin(async move {
                    match handle.await {
                        Ok(_) => info!("{name} task completed"),
                        Err(e) => error!("{name} task failed: {e:?}!"),
                    }
                })
            })
            .collect();

        // Wait for any task to complete, then abort the rest.
        let (_, _, remaining) = futures::future::select_all(futures).await;
        drop(remaining);
        for handle in abort_handles {
            handle.abort();
        }
    }

    fn start_shutdown_signal() -> JoinHandle<()> {
        tokio::spawn(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => {
                    error!("Failed to listen for shutdown signal: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
    }

    fn start_http_server(config: HTTPConfig, app: axum::Router) -> JoinHandle<()> {
        let address = config.address;
        tokio::spawn(async move {
            let result = match config.tls {
                Some(tls_config) => {
                    info!("Starting HTTPS (secure) server on {address}");

                    #[cfg(feature = "tls-rustls")]
                    {
                        let _ = rustls::crypto::CryptoProvider::install_default(
                            rustls::crypto::aws_lc_rs::default_provider(),
                        );
                        match axum_server::tls_rustls::RustlsConfig::from_pem_file(
                            &tls_config.certificate_path,
                            &tls_config.key_path,
                        )
                        .await
                        {
                            Ok(tls) => axum_server::bind_rustls(address, tls)
                                .serve(app.into_make_service())
                                .await
                                .map_err(anyhow::Error::from),
                            Err(e) => Err(anyhow::anyhow!(
                                "Failed to load rustls TLS certificates: {e}"
                            )),
                        }
                    }

                    #[cfg(all(feature = "tls-native", not(feature = "tls-rustls")))]
                    {
                        match axum_server::tls_openssl::OpenSSLConfig::from_pem_file(
                            &tls_config.certificate_path,
                            &tls_config.key_path,
                        ) {
                            Ok(tls) => axum_server::bind_openssl(address, tls)
                                .serve(app.into_make_service())
                                .await
                                .map_err(anyhow::Error::from),
                            Err(e) => Err(anyhow::anyhow!(
                                "Failed to load openssl TLS certificates: {e}"
                            )),
                        }
                    }
                }
                None => {
                    info!("Starting HTTP (insecure) server on {address}");
                    axum_server::bind(address)
                        .serve(app.into_make_service())
                        .await
                        .map_err(anyhow::Error::from)
                }
            };

            if let Err(e) = result {
                error!("Server error: {e:?}");
            }
        })
    }
}
