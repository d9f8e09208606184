use std::{
    fmt::{Debug, Formatter},
    ops::{BitOr, BitOrAssign},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;

use crate::{
    error::Result,
    native::NativeEnv,
    options::{self, UnknownOption},
    signal::nosig,
    term::Term,
};

/// The subsystems and behaviours an environment is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnvFlags(u32);

impl EnvFlags {
    pub const CREATE: Self = Self(1 << 0);
    pub const INIT_LOCK: Self = Self(1 << 1);
    pub const INIT_LOG: Self = Self(1 << 2);
    pub const INIT_MPOOL: Self = Self(1 << 3);
    pub const INIT_REP: Self = Self(1 << 4);
    pub const INIT_TXN: Self = Self(1 << 5);
    pub const RECOVER: Self = Self(1 << 6);
    pub const RECOVER_FATAL: Self = Self(1 << 7);
    pub const USE_ENVIRON: Self = Self(1 << 8);
    pub const USE_ENVIRON_ROOT: Self = Self(1 << 9);
    pub const LOCKDOWN: Self = Self(1 << 10);
    pub const FAILCHK: Self = Self(1 << 11);
    pub const PRIVATE: Self = Self(1 << 12);
    pub const REGISTER: Self = Self(1 << 13);
    pub const SYSTEM_MEM: Self = Self(1 << 14);
    pub const THREAD: Self = Self(1 << 15);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for EnvFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EnvFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

/// Toggle names and the flags each of them switches on.
const TOGGLES: &[(&str, EnvFlags)] = &[
    ("init_lock", EnvFlags::INIT_LOCK),
    ("init_log", EnvFlags::INIT_LOG),
    ("init_mpool", EnvFlags::INIT_MPOOL),
    (
        "init_rep",
        EnvFlags(EnvFlags::INIT_REP.0 | EnvFlags::INIT_TXN.0 | EnvFlags::INIT_LOCK.0),
    ),
    ("init_txn", EnvFlags(EnvFlags::INIT_TXN.0 | EnvFlags::INIT_LOG.0)),
    (
        "recover",
        EnvFlags(EnvFlags::RECOVER.0 | EnvFlags::CREATE.0 | EnvFlags::INIT_TXN.0),
    ),
    (
        "recover_fatal",
        EnvFlags(EnvFlags::RECOVER_FATAL.0 | EnvFlags::CREATE.0 | EnvFlags::INIT_TXN.0),
    ),
    ("use_environ", EnvFlags::USE_ENVIRON),
    ("use_environ_root", EnvFlags::USE_ENVIRON_ROOT),
    ("create", EnvFlags::CREATE),
    ("lockdown", EnvFlags::LOCKDOWN),
    ("failchk", EnvFlags::FAILCHK),
    ("private", EnvFlags::PRIVATE),
    ("register", EnvFlags::REGISTER),
    ("system_mem", EnvFlags::SYSTEM_MEM),
    ("thread", EnvFlags::THREAD),
];

macro_rules! toggles {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(&mut self, on: bool) -> &mut Self {
                self.toggle(stringify!($name), on)
            }
        )*
    };
}

/// Addressing of a remote environment server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub(crate) host: String,
    pub(crate) client_timeout: i64,
    pub(crate) server_timeout: i64,
}

/// The options for opening an environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOptions {
    pub(crate) flags: EnvFlags,
    pub(crate) home: Option<PathBuf>,
    pub(crate) cache_size: Option<u64>,
    pub(crate) mmap_size: Option<u64>,
    pub(crate) lock_timeout: Option<Duration>,
    pub(crate) config: Vec<(String, String)>,
    pub(crate) server: Option<Server>,
}

impl EnvOptions {
    /// Creates a new EnvOptions instance with default values.
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    toggles! {
        init_lock,
        init_log,
        /// The cache is always initialized, whatever is set here.
        init_mpool,
        /// Replication, also initializes transactions and locking.
        init_rep,
        /// Transaction support, also initializes logging.
        ///
        /// A write made outside of a transaction then commits on its own, which rewrites
        /// the database file. Bulk loads are best run in one transaction.
        init_txn,
        /// Run normal recovery on open, implies `create` and transactions.
        recover,
        /// Run catastrophic recovery on open, implies `create` and transactions.
        recover_fatal,
        /// Take the home directory from `$DB_HOME` unless one is given.
        use_environ,
        use_environ_root,
        create,
        lockdown,
        failchk,
        private,
        register,
        system_mem,
        thread,
    }

    fn toggle(&mut self, name: &str, on: bool) -> &mut Self {
        if let Some((_, flags)) = TOGGLES.iter().find(|(toggle, _)| *toggle == name) {
            if on {
                self.flags |= *flags;
            }
        }
        self
    }

    /// Switches a toggle on by its name. Switching a toggle off has no effect.
    pub fn flag(&mut self, name: &str, on: bool) -> Result<&mut Self> {
        if !TOGGLES.iter().any(|(toggle, _)| *toggle == name) {
            return Err(UnknownOption::new("db_option", name).into());
        }
        Ok(self.toggle(name, on))
    }

    /// Set the size of the cache in bytes.
    #[inline]
    pub fn mp_size(&mut self, size: u64) -> &mut Self {
        self.cache_size = Some(size);
        self
    }

    /// Set the maximum size of a file mapped into the cache.
    #[inline]
    pub fn mp_mmapsize(&mut self, size: u64) -> &mut Self {
        self.mmap_size = Some(size);
        self
    }

    /// Set the home directory. Relative database paths are resolved against it.
    #[inline]
    pub fn home(&mut self, home: impl AsRef<Path>) -> &mut Self {
        self.home = Some(home.as_ref().to_path_buf());
        self
    }

    /// Add a configuration line, applied after the `DB_CONFIG` file of the home directory.
    #[inline]
    pub fn config(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.config.push((name.into(), value.into()));
        self
    }

    /// Set how long a write waits for the environment lock before giving up with a deadlock.
    ///
    /// By default, writes wait without limit.
    #[inline]
    pub fn lock_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Address a remote environment server.
    #[inline]
    pub fn server(
        &mut self,
        host: impl Into<String>,
        client_timeout: i64,
        server_timeout: i64,
    ) -> &mut Self {
        self.server = Some(Server {
            host: host.into(),
            client_timeout,
            server_timeout,
        });
        self
    }

    /// Builds the options from an option list such as `[home(Dir), init_txn(true)]`.
    pub fn from_terms(list: &[Term]) -> Result<Self> {
        let mut this = Self::new();
        for term in list {
            if let Term::Compound(name, args) = term {
                if name == "server" && (1..=2).contains(&args.len()) {
                    this.server_terms(&args[0], args.get(1))?;
                    continue;
                }
            }

            let (name, arg) = options::unary(term, "db_option")?;
            match name {
                "mp_size" => {
                    this.mp_size(options::size_arg(arg)?);
                }
                "mp_mmapsize" => {
                    this.mp_mmapsize(options::size_arg(arg)?);
                }
                "home" => {
                    this.home(options::text_arg(arg)?);
                }
                "lock_timeout" => {
                    this.lock_timeout(Duration::from_micros(options::size_arg(arg)?));
                }
                "config" => this.config_terms(arg)?,
                _ => {
                    this.flag(name, options::bool_arg(arg)?)?;
                }
            }
        }
        Ok(this)
    }

    fn config_terms(&mut self, arg: &Term) -> Result<()> {
        let Term::List(lines) = arg else {
            return Err(options::WrongType::new("list", arg).into());
        };
        for line in lines {
            let (name, value) = match line {
                Term::Compound(name, args) if args.len() == 1 => (name, &args[0]),
                _ => return Err(UnknownOption::new("db_config", line.to_string()).into()),
            };
            let value = match value {
                Term::Integer(i) => i.to_string(),
                other => options::text_arg(other)?.to_string(),
            };
            self.config(name.as_str(), value);
        }
        Ok(())
    }

    fn server_terms(&mut self, host: &Term, settings: Option<&Term>) -> Result<()> {
        let host = options::text_arg(host)?.to_string();
        let (mut client_timeout, mut server_timeout) = (0, 0);

        match settings {
            None => {}
            Some(Term::List(settings)) => {
                for option in settings {
                    let (name, arg) = options::unary(option, "server_option")?;
                    match name {
                        "client_timeout" => client_timeout = options::int_arg(arg)?,
                        "server_timeout" => server_timeout = options::int_arg(arg)?,
                        _ => return Err(UnknownOption::new("server_option", name).into()),
                    }
                }
            }
            Some(other) => return Err(options::WrongType::new("list", other).into()),
        }

        self.server(host, client_timeout, server_timeout);
        Ok(())
    }

    /// Open an environment with the current options.
    #[inline]
    pub fn open(&self) -> Result<Environment> {
        Environment::open(self)
    }
}

/// A store environment, shared by the databases and transactions opened in it.
#[derive(Clone)]
pub struct Environment(pub(crate) Arc<NativeEnv>);

impl Environment {
    /// Open an environment with the provided options.
    pub fn open(options: &EnvOptions) -> Result<Self> {
        let env = nosig(|| NativeEnv::open(options))?;
        Ok(Self(env))
    }

    /// A private environment without transaction support.
    #[inline]
    pub(crate) fn private() -> Self {
        Self(NativeEnv::private())
    }

    /// Close the environment. Databases and transactions still open in it fail afterwards.
    #[inline]
    pub fn close(&self) -> Result<()> {
        nosig(|| self.0.close()).map_err(Into::into)
    }

    #[inline]
    pub fn flags(&self) -> EnvFlags {
        self.0.flags
    }

    /// Whether transactions can be run in the environment.
    #[inline]
    pub fn is_transactional(&self) -> bool {
        self.0.transactional()
    }

    /// The size of the cache in bytes.
    #[inline]
    pub fn cache_size(&self) -> u64 {
        self.0.cache_size
    }

    #[inline]
    pub fn mmap_size(&self) -> u64 {
        self.0.mmap_size
    }
}

impl PartialEq for Environment {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Environment {}

impl Debug for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.0.id)
            .field("flags", &self.0.flags)
            .finish()
    }
}

#[derive(Error, Debug)]
#[error("already initialized")]
pub(crate) struct AlreadyInitialized;

static DEFAULT_ENV: Mutex<Option<Environment>> = Mutex::new(None);

/// Initializes the default environment of the process.
///
/// Fails if the default environment is initialized already, [`shutdown`] it first.
pub fn init(options: &EnvOptions) -> Result<()> {
    let mut default = DEFAULT_ENV.lock().unwrap();
    if default.is_some() {
        return Err(AlreadyInitialized.into());
    }
    *default = Some(Environment::open(options)?);
    Ok(())
}

/// Closes the default environment, if there is one.
pub fn shutdown() -> Result<()> {
    let env = DEFAULT_ENV.lock().unwrap().take();
    match env {
        Some(env) => env.close(),
        None => Ok(()),
    }
}

/// The default environment, if initialized.
#[inline]
pub fn default_env() -> Option<Environment> {
    DEFAULT_ENV.lock().unwrap().clone()
}
