//! Account mail: reset, enrollment and verification links

use super::validation::normalize_email;
use super::Accounts;
use crate::error::Result;
use crate::mail::Message;
use tracing::info;

/// Kinds of magic links mailed to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    ResetPassword,
    EnrollAccount,
    VerifyEmail,
}

impl LinkKind {
    fn path(self) -> &'static str {
        match self {
            LinkKind::ResetPassword => "reset-password",
            LinkKind::EnrollAccount => "enroll-account",
            LinkKind::VerifyEmail => "verify-email",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            LinkKind::ResetPassword => "Reset your password",
            LinkKind::EnrollAccount => "Create your account",
            LinkKind::VerifyEmail => "Confirm your email",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            LinkKind::ResetPassword => "Use the link below to choose a new password.",
            LinkKind::EnrollAccount => "You have been invited. Use the link below to set your password.",
            LinkKind::VerifyEmail => "Use the link below to confirm your email address.",
        }
    }
}

/// `{base_url}/auth/{kind}/{token}`
pub(crate) fn magic_link(base_url: &str, kind: LinkKind, token: &str) -> String {
    format!("{}/auth/{}/{}", base_url.trim_end_matches('/'), kind.path(), token)
}

impl Accounts {
    fn compose(&self, to: &str, kind: LinkKind, link: &str) -> Message {
        let site = &self.config.site_name;
        let text = format!(
            "Hello,\n\n{}\n\n{link}\n\nIf you did not ask for this, you can ignore this email.\n\n{site}\n",
            kind.instruction()
        );
        let html = format!(
            "<p>Hello,</p><p>{}</p><p><a href=\"{link}\">{link}</a></p>\
             <p>If you did not ask for this, you can ignore this email.</p><p>{site}</p>",
            kind.instruction()
        );

        Message {
            to: to.to_string(),
            from: self.config.email_from.clone(),
            subject: format!("{site} - {}", kind.subject()),
            text,
            html,
        }
    }

    async fn send_link(&self, email: &str, kind: LinkKind, token: &str) -> Result<()> {
        let link = magic_link(&self.config.base_url, kind, token);
        let message = self.compose(&normalize_email(email), kind, &link);
        self.mailer.send(message).await?;

        info!(kind = kind.path(), "Account mail sent");
        Ok(())
    }

    /// Mails a password reset link
    pub async fn send_reset_password_email(&self, email: &str) -> Result<()> {
        let issued = self.create_password_reset_token(email).await?;
        self.send_link(email, LinkKind::ResetPassword, &issued.token).await
    }

    /// Mails the link that completes an invitation
    pub async fn send_enrollment_email(&self, email: &str) -> Result<()> {
        let issued = self.create_enrollment_token(email).await?;
        self.send_link(email, LinkKind::EnrollAccount, &issued.token).await
    }

    /// Mails an address confirmation link
    pub async fn send_verification_email(&self, email: &str) -> Result<()> {
        let issued = self.create_email_verification_token(email).await?;
        self.send_link(email, LinkKind::VerifyEmail, &issued.token).await
    }
}
