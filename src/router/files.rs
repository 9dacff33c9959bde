//! File-serving router variant.
//!
//! Resolves URLs below its mount point to files under a base directory
//! and streams them through the regular dispatch pipeline, so router
//! policies, pre-handlers and post-handlers (including centralized
//! error pages) all apply. Route handlers cannot be registered on it.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::params::{uri_decode, Params};
use crate::router::{RouteMatch, RouteTarget, Router, RouterKind};

impl Router {
    /// A router serving files from `base` under the `virt_path` mount.
    pub fn file_router<P: AsRef<Path>>(base: P, virt_path: &str)
        -> Rc<Router>
    {
        let base = base
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| base.as_ref().to_path_buf());
        Router::with_kind(virt_path, RouterKind::Files { base })
    }
}

/// Map a local url onto the base directory. `found` is false for
/// missing files and for paths escaping the base (`..` and symlinks
/// are resolved before the containment check).
pub(crate) fn resolve_file(router: &Rc<Router>, base: &Path, url: &str)
    -> RouteMatch
{
    let mount = &router.path()[..router.path().len() - 1];
    let local = url.strip_prefix(mount).unwrap_or(url);
    let rel = uri_decode(local.trim_start_matches('/'));

    let candidate = base.join(&rel);
    let (path, found) = match candidate.canonicalize() {
        Ok(real) => {
            let ok = real.starts_with(base) && real.is_file();
            (real, ok)
        }
        Err(_) => (candidate, false),
    };
    debug!("file route '{}' -> {:?} (found: {})", url, path, found);
    RouteMatch {
        target: RouteTarget::File { router: router.clone(), path, found },
        params: Params::new(),
    }
}
