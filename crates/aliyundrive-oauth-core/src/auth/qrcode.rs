use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::exchange::exchange_code;
use super::{AuthError, AuthorizationApi, QrCodeRequest, QrSession, QrStatus, TokenGrant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timing of the status polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Give up after this long even if the upstream never reports expiry.
    pub max_wait: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

/// Observable progress of a QR login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrLoginState {
    /// The QR code has not been issued yet.
    Starting,
    /// The QR code was issued and should be shown to the user now.
    Created { session: QrSession },
    Polling {
        polls: u32,
        last_status: Option<QrStatus>,
    },
    Succeeded,
    Expired,
    TimedOut { status_url: Url },
    CodeRejected { message: String },
    DeadlineExceeded,
    Cancelled,
    Failed { message: String },
}

impl QrLoginState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            QrLoginState::Starting | QrLoginState::Created { .. } | QrLoginState::Polling { .. }
        )
    }

    fn finished<T>(result: &Result<T, AuthError>) -> Self {
        match result {
            Ok(_) => QrLoginState::Succeeded,
            Err(AuthError::QrCodeExpired) => QrLoginState::Expired,
            Err(AuthError::PollTimedOut { status_url }) => QrLoginState::TimedOut {
                status_url: status_url.clone(),
            },
            Err(err @ AuthError::InvalidCode { .. }) => QrLoginState::CodeRejected {
                message: err.to_string(),
            },
            Err(AuthError::DeadlineExceeded) => QrLoginState::DeadlineExceeded,
            Err(AuthError::Cancelled) => QrLoginState::Cancelled,
            Err(other) => QrLoginState::Failed {
                message: other.to_string(),
            },
        }
    }
}

/// Drives one QR login attempt from code issuance to refresh token.
///
/// The session polls `qrcode/{sid}/status` every [`PollSettings::interval`] until the
/// upstream reports `LoginSuccess` or `QRCodeExpired`, a poll fails to complete, the
/// optional deadline passes, or the cancellation token fires. Only `LoginSuccess`
/// leads to a code exchange.
#[derive(Debug)]
pub struct QrLoginSession<A> {
    api: A,
    request: QrCodeRequest,
    settings: PollSettings,
    cancel: CancellationToken,
}

impl<A> QrLoginSession<A>
where
    A: AuthorizationApi,
{
    pub fn new(api: A, request: QrCodeRequest) -> Self {
        Self {
            api,
            request,
            settings: PollSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a QR code from the upstream provider.
    pub async fn start(&self) -> Result<QrSession, AuthError> {
        if self.request.scopes.iter().all(|scope| scope.trim().is_empty()) {
            return Err(AuthError::Validation(
                "at least one scope is required".into(),
            ));
        }
        let response = self
            .cancellable(self.api.request_qrcode(&self.request))
            .await?;
        let session = QrSession::from_response(&response)?;
        info!(sid = %session.sid, "qrcode issued");
        Ok(session)
    }

    /// Poll an issued QR code until it resolves, then exchange the authorization code.
    pub async fn wait_for_token(&self, session: &QrSession) -> Result<TokenGrant, AuthError> {
        self.complete(session, &mut |_| {}).await
    }

    /// Run the whole attempt, reporting every state transition to `observe`.
    ///
    /// `observe` sees [`QrLoginState::Created`] before the first poll so the QR code
    /// can be rendered, and exactly one terminal state at the end.
    pub async fn run<F>(&self, mut observe: F) -> Result<TokenGrant, AuthError>
    where
        F: FnMut(&QrLoginState),
    {
        let result = match self.start().await {
            Ok(session) => {
                observe(&QrLoginState::Created {
                    session: session.clone(),
                });
                self.complete(&session, &mut observe).await
            }
            Err(err) => Err(err),
        };
        let state = QrLoginState::finished(&result);
        info!(state = ?state, "qrcode login finished");
        observe(&state);
        result
    }

    async fn complete<F>(
        &self,
        session: &QrSession,
        observe: &mut F,
    ) -> Result<TokenGrant, AuthError>
    where
        F: FnMut(&QrLoginState),
    {
        let auth_code = self.poll(session, observe).await?;
        self.cancellable(exchange_code(&self.api, &auth_code)).await
    }

    async fn poll<F>(&self, session: &QrSession, observe: &mut F) -> Result<String, AuthError>
    where
        F: FnMut(&QrLoginState),
    {
        let deadline = self.settings.max_wait.map(|wait| Instant::now() + wait);
        let mut polls: u32 = 0;
        observe(&QrLoginState::Polling {
            polls,
            last_status: None,
        });

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(sid = %session.sid, polls, "qrcode login deadline exceeded");
                return Err(AuthError::DeadlineExceeded);
            }

            let status = self
                .cancellable(self.api.qrcode_status(&session.sid))
                .await?;
            polls += 1;
            debug!(sid = %session.sid, polls, status = status.as_str(), "qrcode status polled");

            match status {
                QrStatus::LoginSuccess { auth_code } => return Ok(auth_code),
                QrStatus::QrCodeExpired => return Err(AuthError::QrCodeExpired),
                pending => observe(&QrLoginState::Polling {
                    polls,
                    last_status: Some(pending),
                }),
            }

            self.cancellable(async {
                tokio::time::sleep(self.settings.interval).await;
                Ok(())
            })
            .await?;
        }
    }

    async fn cancellable<T, Fut>(&self, future: Fut) -> Result<T, AuthError>
    where
        Fut: std::future::Future<Output = Result<T, AuthError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
            result = future => result,
        }
    }
}

impl<A> QrLoginSession<A>
where
    A: AuthorizationApi + 'static,
{
    /// Run the attempt on its own task.
    pub fn spawn(self) -> QrLoginHandle {
        let (state_tx, state_rx) = watch::channel(QrLoginState::Starting);
        let (session_tx, session_rx) = oneshot::channel();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut session_tx = Some(session_tx);
            self.run(move |state| {
                if let QrLoginState::Created { session } = state {
                    if let Some(tx) = session_tx.take() {
                        let _ = tx.send(session.clone());
                    }
                }
                state_tx.send_replace(state.clone());
            })
            .await
        });

        QrLoginHandle {
            state: state_rx,
            session: Some(session_rx),
            issued: None,
            cancel,
            task,
        }
    }
}

/// Handle to a QR login attempt running on its own task.
#[derive(Debug)]
pub struct QrLoginHandle {
    state: watch::Receiver<QrLoginState>,
    session: Option<oneshot::Receiver<QrSession>>,
    issued: Option<QrSession>,
    cancel: CancellationToken,
    task: JoinHandle<Result<TokenGrant, AuthError>>,
}

impl QrLoginHandle {
    /// Wait for the QR code to be issued; `None` if the attempt ended first.
    pub async fn qr_session(&mut self) -> Option<QrSession> {
        if let Some(receiver) = self.session.take() {
            self.issued = receiver.await.ok();
        }
        self.issued.clone()
    }

    pub fn state(&self) -> QrLoginState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QrLoginState> {
        self.state.clone()
    }

    /// Stop polling; the attempt ends with [`AuthError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<TokenGrant, AuthError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(error = %err, "qrcode login task aborted");
                Err(AuthError::Cancelled)
            }
        }
    }
}
