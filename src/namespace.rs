//! Namespace registry and qualified symbol resolution.
//!
//! Every namespace owns an environment whose parent is the shared global
//! environment holding the builtins. Namespaces see each other only through
//! `(:require ...)` aliases, and host modules only through `(:import ...)`.
//!
//! Required namespaces that are backed by source files are not evaluated
//! while the `ns` form runs. Their text is parked inside the new
//! namespace and its name is queued; the top-level driver drains the queue
//! with [`NamespaceManager::evaluate_deferred_namespace`] once the requiring
//! form has finished, so two files requiring each other never recurse.

use crate::Error;
use crate::ast::Value;
use crate::evaluator::Environment;
use crate::interop::{HostExport, HostModule, HostProvider, StandardHost};
use crate::loader::{FileSystemLocator, SourceLocator};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Namespace that is current when a manager is created
pub const DEFAULT_NAMESPACE: &str = "user";

const DEFERRED_CONTENT: &str = "__deferred_content__";
const DEFERRED_FILEPATH: &str = "__deferred_filepath__";

#[derive(Debug)]
pub struct NamespaceInfo {
    pub name: String,
    pub env: Environment,
    /// Host capabilities imported by bare name
    pub imports: HashMap<String, HostExport>,
    /// Required namespace name to the alias it is referenced by
    pub requires: HashMap<String, String>,
}

impl NamespaceInfo {
    fn new(name: &str, base_env: &Environment) -> Self {
        NamespaceInfo {
            name: name.to_owned(),
            env: Environment::with_parent(base_env),
            imports: HashMap::new(),
            requires: HashMap::new(),
        }
    }

    /// Real namespace name registered under `alias`
    pub fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.requires
            .iter()
            .find(|(_, registered)| registered.as_str() == alias)
            .map(|(namespace, _)| namespace.as_str())
    }

    /// Whether source text is parked here waiting to be evaluated
    pub fn has_deferred_content(&self) -> bool {
        self.env.contains_local(DEFERRED_CONTENT)
    }
}

pub struct NamespaceManager {
    namespaces: HashMap<String, NamespaceInfo>,
    current: String,
    base_env: Environment,
    host: Rc<dyn HostProvider>,
    locator: Box<dyn SourceLocator>,
    /// Host modules already loaded by `(:import ...)`
    capabilities: HashMap<String, Rc<HostModule>>,
    pending: VecDeque<String>,
}

impl std::fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("NamespaceManager")
            .field("current", &self.current)
            .field("namespaces", &names)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl NamespaceManager {
    /// Create a manager whose namespaces all inherit from `base_env`.
    ///
    /// Sources are looked up relative to the working directory and host
    /// access goes through a [`StandardHost`].
    pub fn new(base_env: Environment) -> Self {
        let mut manager = NamespaceManager {
            namespaces: HashMap::new(),
            current: DEFAULT_NAMESPACE.to_owned(),
            base_env,
            host: Rc::new(StandardHost::new()),
            locator: Box::new(FileSystemLocator::default()),
            capabilities: HashMap::new(),
            pending: VecDeque::new(),
        };
        manager.ensure_namespace(DEFAULT_NAMESPACE);
        manager
    }

    pub fn with_host(mut self, host: Rc<dyn HostProvider>) -> Self {
        self.host = host;
        self.capabilities.clear();
        self
    }

    pub fn with_locator(mut self, locator: impl SourceLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn host(&self) -> Rc<dyn HostProvider> {
        self.host.clone()
    }

    pub fn base_env(&self) -> &Environment {
        &self.base_env
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    /// Environment of the current namespace
    pub fn current_env(&self) -> Environment {
        match self.namespaces.get(&self.current) {
            Some(info) => info.env.clone(),
            // `current` always names a registered namespace
            None => self.base_env.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceInfo> {
        self.namespaces.get(name)
    }

    /// Registered namespace names, sorted
    pub fn namespace_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create `name` if it does not exist yet
    pub fn ensure_namespace(&mut self, name: &str) -> &NamespaceInfo {
        let base_env = &self.base_env;
        self.namespaces.entry(name.to_owned()).or_insert_with(|| {
            log::debug!("creating namespace {name}");
            NamespaceInfo::new(name, base_env)
        })
    }

    /// Make `name` current, creating it if needed
    pub fn switch_to(&mut self, name: &str) {
        self.ensure_namespace(name);
        if self.current != name {
            log::debug!("switching namespace {} -> {name}", self.current);
            self.current = name.to_owned();
        }
    }

    fn current_info(&self) -> Option<&NamespaceInfo> {
        self.namespaces.get(&self.current)
    }

    fn current_info_mut(&mut self) -> &mut NamespaceInfo {
        let base_env = &self.base_env;
        let name = &self.current;
        self.namespaces
            .entry(name.clone())
            .or_insert_with(|| NamespaceInfo::new(name, base_env))
    }

    /// Resolve a symbol as seen from `env` inside the current namespace.
    ///
    /// Lexical bindings always win. A `alias/member` symbol then looks
    /// `member` up in the frame of the namespace required as `alias`, and
    /// finally bare names fall back to the current namespace's imports.
    pub fn resolve_symbol(&self, name: &str, env: &Environment) -> Result<Value, Error> {
        if let Some(value) = env.lookup(name) {
            return Ok(value);
        }

        let current = self.current_info();
        if let Some((alias, member)) = name.split_once('/')
            && !alias.is_empty()
            && !member.is_empty()
        {
            let Some(namespace) = current.and_then(|info| info.resolve_alias(alias)) else {
                return Err(Error::UnknownNamespaceAlias(alias.to_owned()));
            };
            return self
                .namespaces
                .get(namespace)
                .and_then(|info| info.env.get_local(member))
                .ok_or_else(|| Error::MemberNotFoundInNamespace {
                    namespace: namespace.to_owned(),
                    member: member.to_owned(),
                });
        }

        current
            .and_then(|info| info.imports.get(name))
            .map(|export| export.to_value(name))
            .ok_or_else(|| Error::UndefinedSymbol(name.to_owned()))
    }

    /// Register `alias` for `namespace` in the current namespace, creating
    /// the target if it is unknown.
    ///
    /// A new target is filled from its source file (parked for deferred
    /// evaluation), else from a same-named host module, else left empty.
    pub fn add_require(&mut self, namespace: &str, alias: &str) {
        log::debug!("{} requires {namespace} as {alias}", self.current);
        self.current_info_mut()
            .requires
            .insert(namespace.to_owned(), alias.to_owned());

        if self.namespaces.contains_key(namespace) {
            return;
        }
        let env = self.ensure_namespace(namespace).env.clone();

        if let Some(source) = self.locator.find_source(namespace) {
            log::debug!(
                "deferring load of {namespace} from {}",
                source.path.display()
            );
            env.define(DEFERRED_CONTENT, Value::String(source.content));
            env.define(
                DEFERRED_FILEPATH,
                Value::String(source.path.display().to_string()),
            );
            self.pending.push_back(namespace.to_owned());
        } else if let Some(module) = self.host.find_module(namespace) {
            log::debug!("wrapping host module {namespace}");
            self.host.wrap_module(&module, &env);
        } else {
            log::debug!("namespace {namespace} has no source or host module");
        }
    }

    /// Import host capabilities from `module` into the current namespace:
    /// every exported function, or only `names` when given.
    pub fn add_import(&mut self, module: &str, names: Option<&[String]>) -> Result<(), Error> {
        let selected = self.select_exports(module, names)?;
        self.current_info_mut().imports.extend(selected);
        Ok(())
    }

    /// The exports an import of `module` would bring in, without binding them
    pub(crate) fn select_exports(
        &mut self,
        module: &str,
        names: Option<&[String]>,
    ) -> Result<Vec<(String, HostExport)>, Error> {
        let capabilities = match self.capabilities.get(module) {
            Some(cached) => cached.clone(),
            None => {
                let loaded = self
                    .host
                    .find_module(module)
                    .ok_or_else(|| Error::EvalError(format!("Unknown host module: {module}")))?;
                log::debug!("loaded host capabilities {module}");
                self.capabilities.insert(module.to_owned(), loaded.clone());
                loaded
            }
        };

        let selected: Vec<(String, HostExport)> = match names {
            None => capabilities
                .exports()
                .filter(|(_, export)| matches!(export, HostExport::Function { .. }))
                .map(|(name, export)| (name.to_owned(), export.clone()))
                .collect(),
            Some(names) => names
                .iter()
                .map(|name| match capabilities.export(name) {
                    Some(export) => Ok((name.clone(), export.clone())),
                    None => Err(Error::MemberNotFoundInNamespace {
                        namespace: module.to_owned(),
                        member: name.clone(),
                    }),
                })
                .collect::<Result<_, _>>()?,
        };
        Ok(selected)
    }

    /// Namespaces queued for deferred evaluation, in require order
    pub fn take_pending_loads(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Evaluate the source parked in namespace `name` with `eval`.
    ///
    /// The namespace is current while `eval` runs and the previous one is
    /// restored afterwards. Markers are cleared first, so the content runs
    /// at most once. A failure is logged and swallowed. Returns whether any
    /// content was evaluated.
    pub fn evaluate_deferred_namespace<F>(&mut self, name: &str, eval: F) -> bool
    where
        F: FnOnce(&str, &mut NamespaceManager) -> Result<Value, Error>,
    {
        let Some(env) = self.namespaces.get(name).map(|info| info.env.clone()) else {
            return false;
        };
        let Some(Value::String(content)) = env.remove_local(DEFERRED_CONTENT) else {
            return false;
        };
        let path = match env.remove_local(DEFERRED_FILEPATH) {
            Some(Value::String(path)) => path,
            _ => String::from("<unknown>"),
        };

        log::debug!("evaluating deferred namespace {name} from {path}");
        let previous = std::mem::replace(&mut self.current, name.to_owned());
        let result = eval(&content, self);
        self.current = previous;

        if let Err(err) = result {
            log::warn!("failed to load namespace {name} from {path}: {err}");
        }
        true
    }

    /// Drop every namespace and start over from `base_env`.
    ///
    /// Frames are cleared before they are dropped, which frees closures that
    /// captured their own namespace environment.
    pub fn reset(&mut self, base_env: Environment) {
        for info in self.namespaces.values() {
            info.env.clear();
        }
        self.base_env.clear();
        self.namespaces.clear();
        self.capabilities.clear();
        self.pending.clear();
        self.base_env = base_env;
        self.current = DEFAULT_NAMESPACE.to_owned();
        self.ensure_namespace(DEFAULT_NAMESPACE);
    }
}
