//! Startup banner.

use crate::consts::{AUTHOR, HOMEPAGE, REPO};

/// Server configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub addr: &'a str,
    pub endpoint: &'a str,
    pub input_field: &'a str,
    pub plugins: &'a [String],
    pub services: &'a [&'a str],
    pub memory: &'a str,
}

/// Render the banner text.
pub fn banner(info: &BannerInfo) -> String {
    format!(
        r#"
   ╔═══════════════════════════════════════╗
   ║             T R E V O R               ║
   ║   many plugins ask, the best answers  ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   listen    {}
   endpoint  POST {} {{"{}": "..."}}
   plugins   {}
   services  {}
   memory    {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.addr,
        info.endpoint,
        info.input_field,
        list_or_none(info.plugins.iter().map(String::as_str)),
        list_or_none(info.services.iter().copied()),
        info.memory,
    )
}

/// Print the startup banner.
pub fn print_banner(info: &BannerInfo) {
    println!("{}", banner(info));
}

fn list_or_none<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}
