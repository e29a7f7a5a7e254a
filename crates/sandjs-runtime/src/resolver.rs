//! Import resolution over an immutable [`SourceDir`].
//!
//! Two specifier classes exist: the reserved host-capability specifier,
//! which synthesizes the host bridge for this session and evaluates to a
//! one-line module exporting it, and exact-match lookups in the source dir.
//! There is no relative-path resolution and no transitive fetching;
//! resolution is pure per call.

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module};

use crate::bridge::{self, HostState};
use crate::source::SourceDir;

/// Reserved import specifier for the host-capability module.
pub const HOST_SPECIFIER: &str = "sandbox:std";

/// Resolver half: accepts the reserved specifier and exact source-dir keys.
pub(crate) struct SourceResolver {
    dir: SourceDir,
}

impl SourceResolver {
    pub(crate) fn new(dir: &SourceDir) -> Self {
        Self { dir: dir.clone() }
    }
}

impl Resolver for SourceResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        if name == HOST_SPECIFIER || self.dir.lookup(name).is_some() {
            return Ok(name.to_string());
        }
        Err(Error::new_resolving_message(
            base,
            name,
            format!("No module {name}"),
        ))
    }
}

/// Loader half: returns source text for resolved names and installs the
/// host bridge when the reserved specifier is loaded.
pub(crate) struct SourceLoader {
    dir: SourceDir,
    host: HostState,
}

impl SourceLoader {
    pub(crate) fn new(dir: SourceDir, host: HostState) -> Self {
        Self { dir, host }
    }
}

impl Loader for SourceLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        if name == HOST_SPECIFIER {
            // Fresh bridge object per session, bound into the guest global
            // right before the module body references it.
            bridge::install(ctx, &self.host)?;
            return Module::declare(ctx.clone(), name, bridge::HOST_MODULE_SOURCE);
        }
        match self.dir.lookup(name) {
            Some(source) => Module::declare(ctx.clone(), name, source),
            None => Err(Error::new_loading_message(name, format!("No module {name}"))),
        }
    }
}
