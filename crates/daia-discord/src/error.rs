/// Errors produced by the Discord adapter.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured (set [discord] bot_token or DAIA_DISCORD__BOT_TOKEN)")]
    NoToken,
}

/// HTTP status of a failed Discord REST call, if it got that far.
pub(crate) fn http_status(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(e) => e.status_code().map(|s| s.as_u16()),
        _ => None,
    }
}
