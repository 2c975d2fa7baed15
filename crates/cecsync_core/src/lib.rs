pub mod article;
pub mod assets;
pub mod bundle;
pub mod config;
pub mod deploy;
pub mod frontmatter;
pub mod html;
pub mod manifest;
pub mod page;
pub mod publish;
pub mod retry;
pub mod runtime;
pub mod taxonomy;
pub mod toolkit;
