//! Outgoing email and SMS.
//!
//! [`AuthMessageSender`] is the development sender: it logs each message and
//! keeps it in an outbox instead of talking to an SMTP server or SMS gateway.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::info;

use crate::handler::BoxFuture;

#[derive(Debug, Error, PartialEq)]
pub enum NotifyError {
    #[error("invalid recipient `{0}`")]
    InvalidRecipient(String),
}

pub trait EmailSender: Send + Sync + 'static {
    fn send_email<'a>(
        &'a self,
        email: &'a str,
        subject: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

pub trait SmsSender: Send + Sync + 'static {
    fn send_sms<'a>(&'a self, number: &'a str, message: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutgoingMessage {
    Email { to: String, subject: String, body: String },
    Sms { to: String, body: String },
}

#[derive(Default)]
pub struct AuthMessageSender {
    outbox: Mutex<Vec<OutgoingMessage>>,
}

impl AuthMessageSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages "sent" so far, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingMessage> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, message: OutgoingMessage) {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).push(message);
    }
}

impl EmailSender for AuthMessageSender {
    fn send_email<'a>(
        &'a self,
        email: &'a str,
        subject: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let to = email.trim();
            if to.is_empty() || !to.contains('@') {
                return Err(NotifyError::InvalidRecipient(email.to_owned()));
            }
            info!(%to, %subject, "email queued");
            self.record(OutgoingMessage::Email {
                to: to.to_owned(),
                subject: subject.to_owned(),
                body: message.to_owned(),
            });
            Ok(())
        })
    }
}

impl SmsSender for AuthMessageSender {
    fn send_sms<'a>(&'a self, number: &'a str, message: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let to = number.trim();
            let digits = to.strip_prefix('+').unwrap_or(to);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(NotifyError::InvalidRecipient(number.to_owned()));
            }
            info!(%to, "sms queued");
            self.record(OutgoingMessage::Sms { to: to.to_owned(), body: message.to_owned() });
            Ok(())
        })
    }
}
