//! Terminal stand-in for the browser redirect

use catalog_auth::Navigator;
use tracing::info;
use url::Url;

/// Prints the authorization URL for the user to open.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &Url) {
        info!(host = ?url.host_str(), "authorization URL ready");
        eprintln!("Open this URL in your browser to authorize album-search:\n\n  {url}\n");
    }
}
