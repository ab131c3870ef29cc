//! Call-site filtering: exempting named call sites from fuzz injection
//!
//! Some call sites are known to destabilize a fuzzing run when their
//! nondeterministic reads are substituted. Rather than editing those sites,
//! the embedder names them in a [`DisallowList`] and [`CallSiteFilter`]
//! plants a probe pair around each one through a platform-provided
//! [`HookInstaller`]. The installed probes deliver a disable event on entry
//! and an enable event on exit of the named site, so injection is suppressed
//! for the whole call at the granularity the platform mechanism offers.
//!
//! The list is read once at startup and immutable afterwards. Hook
//! installation is best effort: a site that fails to install is logged and
//! skipped, and installation stops quietly once the fixed probe capacity is
//! reached.
//!
//! Toggling a shared agent from probes is only sound with a single execution
//! context per agent instance or external serialization around it; the
//! filter itself takes no locks.

use thiserror::Error;

/// Maximum number of call-site probes that can be installed
pub const MAX_CALL_SITE_HOOKS: usize = 16;

/// Immutable set of call-site names exempted from fuzz injection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisallowList {
    /// Exempted call-site names, in configuration order
    sites: Vec<String>,
}

impl DisallowList {
    /// Parse the boot-argument syntax: a comma-separated list of call-site
    /// names. Empty entries are dropped.
    #[must_use]
    pub fn from_cmdline(arg: &str) -> Self {
        let sites = arg
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(String::from)
            .collect();
        Self { sites }
    }

    /// Build a list from already separated names
    #[must_use]
    pub fn from_sites(sites: Vec<String>) -> Self {
        Self { sites }
    }

    /// The exempted call-site names
    #[must_use]
    pub fn sites(&self) -> &[String] {
        &self.sites
    }

    /// Whether no sites are exempted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Errors a platform hook mechanism can report for one call site
#[derive(Error, Debug)]
pub enum HookError {
    /// The named call site does not resolve to a probe location
    #[error("call site `{0}` could not be resolved")]
    UnresolvedSite(String),

    /// The platform refused to arm the probe
    #[error("probe installation failed: {0}")]
    InstallFailed(String),
}

/// Platform capability to plant a probe pair at a named call site
///
/// An implementation must arrange for the installed probe to deliver
/// [`AgentEvent::Disable`](crate::agent::AgentEvent::Disable) when the site
/// is entered and [`AgentEvent::Enable`](crate::agent::AgentEvent::Enable)
/// when it returns, on every exit path. Nested entries of the same site
/// toggle correctly through ordinary probe pairing.
pub trait HookInstaller {
    /// Plant the probe pair at `site`
    ///
    /// # Errors
    ///
    /// Returns a [`HookError`] when the site cannot be resolved or the
    /// platform refuses the probe. The caller treats this as non-fatal.
    fn install(&mut self, site: &str) -> Result<(), HookError>;
}

/// Registry of successfully installed call-site probes
#[derive(Debug, Default)]
pub struct CallSiteFilter {
    /// Names of the sites whose probes were armed
    installed: Vec<String>,
}

impl CallSiteFilter {
    /// Install probes for every name in the list, up to
    /// [`MAX_CALL_SITE_HOOKS`]
    ///
    /// Individual installation failures are logged and skipped; reaching the
    /// probe capacity logs a warning and leaves the remaining names
    /// uninstalled. Neither aborts startup.
    pub fn install(list: &DisallowList, installer: &mut dyn HookInstaller) -> Self {
        let mut installed = Vec::new();

        for site in list.sites() {
            if installed.len() >= MAX_CALL_SITE_HOOKS {
                log::warn!("max number of call-site probes reached ({MAX_CALL_SITE_HOOKS})");
                break;
            }

            log::info!("disable fuzzing mutation for {site}");
            match installer.install(site) {
                Ok(()) => installed.push(site.clone()),
                Err(err) => {
                    log::warn!("skipping call-site probe for {site}: {err}");
                }
            }
        }

        Self { installed }
    }

    /// Names of the sites whose probes were armed
    #[must_use]
    pub fn installed(&self) -> &[String] {
        &self.installed
    }
}
