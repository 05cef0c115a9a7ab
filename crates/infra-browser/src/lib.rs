// Citewatch Infrastructure - Browser Adapter
// Implements: BrowserPort, PageDriver over the Chrome DevTools Protocol

pub mod browser;
pub mod cdp;
pub mod launcher;
pub mod page;
mod scripts;

pub use browser::ChromeBrowser;
pub use cdp::CdpClient;
pub use launcher::{find_browser_binary, BrowserConfig, ChromeLauncher};
pub use page::CdpPage;
