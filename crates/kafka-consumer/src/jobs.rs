//! Background jobs triggered by domain events.

use std::sync::Arc;
use std::time::Duration;

use app_config::AppConfig;
use tracing::{error, info, warn};

use crate::mail::{Email, MailError, Mailer};

/// Recipient and token of a verification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeEmail {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub verification_token: String,
}

/// Sends the welcome / verification email, retrying failed deliveries.
pub struct WelcomeEmailJob {
    mailer: Arc<dyn Mailer>,
    app_name: String,
    app_url: String,
    max_attempts: u32,
    backoff: Duration,
}

impl WelcomeEmailJob {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        app_name: impl Into<String>,
        app_url: impl Into<String>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            mailer,
            app_name: app_name.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(mailer: Arc<dyn Mailer>, config: &AppConfig) -> Self {
        Self::new(
            mailer,
            config.app_name.clone(),
            config.app_url.clone(),
            config.mail_max_attempts,
            config.mail_backoff,
        )
    }

    pub fn verification_url(&self, token: &str) -> String {
        format!("{}/api/v1/auth/verify-email/{token}", self.app_url)
    }

    pub fn render(&self, job: &WelcomeEmail) -> Email {
        let link = self.verification_url(&job.verification_token);
        Email {
            to: job.email.clone(),
            subject: format!("Welcome to {}! Please verify your email", self.app_name),
            body: format!(
                "Hello {},\n\nThanks for signing up at {}. Please confirm your email address by visiting:\n\n{link}\n\nIf you did not create an account, no further action is required.",
                job.name, self.app_name
            ),
        }
    }

    /// Delivers the email. Returns the last error once every attempt failed.
    pub async fn run(&self, job: &WelcomeEmail) -> Result<(), MailError> {
        let email = self.render(job);
        let mut attempt = 1;
        loop {
            match self.mailer.send(&email).await {
                Ok(()) => {
                    info!(user_id = job.user_id, email = %job.email, attempt, "Welcome email sent");
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        user_id = job.user_id,
                        attempt,
                        error = %e,
                        "Welcome email failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        user_id = job.user_id,
                        email = %job.email,
                        attempts = attempt,
                        error = %e,
                        "Failed to send welcome email"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the first `failures` sends, then records every email.
    #[derive(Default)]
    struct FlakyMailer {
        failures: Mutex<u32>,
        sent: Mutex<Vec<Email>>,
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, email: &Email) -> Result<(), MailError> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError::Transport("smtp down".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn job() -> WelcomeEmail {
        WelcomeEmail {
            user_id: 7,
            name: "Ayşe".into(),
            email: "ayse@example.com".into(),
            verification_token: "tok123".into(),
        }
    }

    #[test]
    fn test_render_contains_link() {
        let job_runner = WelcomeEmailJob::new(
            Arc::new(FlakyMailer::default()),
            "Storefront",
            "http://localhost:8081/",
            3,
            Duration::ZERO,
        );
        let email = job_runner.render(&job());
        assert_eq!(email.to, "ayse@example.com");
        assert_eq!(email.subject, "Welcome to Storefront! Please verify your email");
        assert!(email
            .body
            .contains("http://localhost:8081/api/v1/auth/verify-email/tok123"));
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let mailer = Arc::new(FlakyMailer {
            failures: Mutex::new(2),
            ..Default::default()
        });
        let runner = WelcomeEmailJob::new(mailer.clone(), "Storefront", "http://x", 3, Duration::ZERO);

        runner.run(&job()).await.unwrap();
        assert_eq!(*mailer.attempts.lock().unwrap(), 3);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mailer = Arc::new(FlakyMailer {
            failures: Mutex::new(5),
            ..Default::default()
        });
        let runner = WelcomeEmailJob::new(mailer.clone(), "Storefront", "http://x", 2, Duration::ZERO);

        assert!(runner.run(&job()).await.is_err());
        assert_eq!(*mailer.attempts.lock().unwrap(), 2);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }
}
