//! HTTP implementations of the pipeline's collaborator traits: the Google
//! Sheets queue, the Shopify publisher, GitHub Actions/Issues for the
//! supervisor, and Slack notifications.

mod http;

pub mod github;
pub mod sheets;
pub mod shopify;
pub mod slack;

pub use github::{GitHubClient, GitHubConfig};
pub use sheets::{SheetsConfig, SheetsQueue};
pub use shopify::{ShopifyConfig, ShopifyPublisher};
pub use slack::SlackNotifier;
