//! CLI-facing session commands

use anyhow::{Context, Result};

use super::{SessionTokenManager, TokenState};
use crate::models::UserProfile;

/// Credentials handed over by a completed login.
#[derive(Debug, Default)]
pub struct LoginArgs {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Raw JSON of the user profile
    pub profile: Option<String>,
    /// Synthesize an offline credential instead of using a server-issued one
    pub offline: bool,
}

/// Store the tokens of a completed login.
pub async fn login(session: &SessionTokenManager, args: LoginArgs) -> Result<()> {
    let access_token = if args.offline {
        format!("offline_{}", chrono::Utc::now().timestamp_millis())
    } else {
        args.access_token
            .context("--access-token is required unless --offline is given")?
    };

    let profile = args
        .profile
        .as_deref()
        .map(serde_json::from_str::<UserProfile>)
        .transpose()
        .context("--profile is not valid JSON")?;

    session.establish_session(access_token, args.refresh_token.as_deref(), profile.as_ref())?;

    match session.token_state() {
        TokenState::Fresh | TokenState::ExpiringSoon => println!("Login stored."),
        state => println!("Login stored, but the access token is {}.", state),
    }
    Ok(())
}

/// Clear stored credentials
pub async fn logout(session: &SessionTokenManager) -> Result<()> {
    session.logout();
    println!("Logged out.");
    Ok(())
}

/// Force a refresh and report the outcome.
pub async fn refresh_now(session: &SessionTokenManager) -> Result<()> {
    session
        .refresh_access_token()
        .await
        .context("Token refresh failed")?;
    println!("Access token is {}.", session.token_state());
    Ok(())
}

/// Display current session status
pub async fn status(session: &SessionTokenManager) -> Result<()> {
    let status = session.status();

    if status.bypass_auth {
        println!("Auth bypass: ON (tokens are not sent)");
    }

    println!("Access token:  {}", status.state);
    if let Some(exp) = status.expires_at {
        println!("  expires_at:  {}", exp.to_rfc3339());
    }

    if status.has_refresh_token {
        println!("Refresh token: present");
    } else {
        println!("Refresh token: none");
    }

    println!(
        "Restorable:    {}",
        if status.restorable { "yes" } else { "no" }
    );

    if let Some(profile) = session.user_profile() {
        println!(
            "User:          {}",
            profile
                .display_name()
                .or(profile.email())
                .or(profile.id())
                .unwrap_or("(unnamed)")
        );
    }

    if status.state == TokenState::Absent && !status.has_refresh_token {
        println!("\nRun 'approval-session login' to authenticate.");
    }

    Ok(())
}
