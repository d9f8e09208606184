use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use crate::{
    env::{EnvFlags, EnvOptions},
    native::{lock::Lock, table::Table},
    status::Status,
};

/// Default cache size of an environment (256 KB).
const DEFAULT_CACHE_SIZE: u64 = 256 * 1024;
/// Smallest cache size an environment accepts (20 KB).
const MIN_CACHE_SIZE: u64 = 20 * 1024;
/// Default maximum size of a file mapped into the cache (10 MB).
const DEFAULT_MMAP_SIZE: u64 = 10 * 1024 * 1024;

/// The name of the configuration file read from the home directory.
const CONFIG_FILE: &str = "DB_CONFIG";

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type TableKey = (PathBuf, Option<String>);

/// A store environment: shared tables, the write lock and the environment's settings.
pub(crate) struct NativeEnv {
    pub(crate) id: u64,
    pub(crate) flags: EnvFlags,
    home: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    pub(crate) cache_size: u64,
    pub(crate) mmap_size: u64,
    pub(crate) lock_timeout: Option<Duration>,
    pub(crate) lock: Lock,
    pub(crate) tables: Mutex<HashMap<TableKey, Weak<Table>>>,
    next_table: AtomicU64,
    next_txn: AtomicU32,
    panicked: AtomicBool,
    closed: AtomicBool,
}

impl NativeEnv {
    /// Opens an environment as configured by the options.
    pub(crate) fn open(options: &EnvOptions) -> Result<Arc<Self>, Status> {
        if let Some(server) = &options.server {
            tracing::error!(
                host = %server.host,
                client_timeout = server.client_timeout,
                server_timeout = server.server_timeout,
                "remote environments are not supported by this store"
            );
            return Err(Status::NOSERVER);
        }

        let mut flags = options.flags;
        flags.insert(EnvFlags::INIT_MPOOL);

        let home = options.home.clone().or_else(|| {
            flags
                .intersects(EnvFlags::USE_ENVIRON | EnvFlags::USE_ENVIRON_ROOT)
                .then(|| std::env::var_os("DB_HOME").map(PathBuf::from))
                .flatten()
        });
        if let Some(home) = &home {
            if !home.is_dir() {
                tracing::error!(home = %home.display(), "environment home is not a directory");
                return Err(Status::ENOENT);
            }
        }

        let mut env = Self::with_flags(flags);
        env.home = home;
        env.cache_size = options.cache_size.unwrap_or(DEFAULT_CACHE_SIZE);
        env.mmap_size = options.mmap_size.unwrap_or(DEFAULT_MMAP_SIZE);
        env.lock_timeout = options.lock_timeout;

        for (name, value) in env.config_file()?.iter().chain(&options.config) {
            env.apply_config(name, value)?;
        }
        env.cache_size = env.cache_size.max(MIN_CACHE_SIZE);

        if flags.intersects(EnvFlags::RECOVER | EnvFlags::RECOVER_FATAL) {
            tracing::info!(home = ?env.home, "running environment recovery");
        }
        tracing::info!(
            id = env.id,
            home = ?env.home,
            transactional = env.transactional(),
            cache_size = env.cache_size,
            "opened environment"
        );
        Ok(Arc::new(env))
    }

    /// A private environment without transaction support, used by standalone databases.
    pub(crate) fn private() -> Arc<Self> {
        let mut env = Self::with_flags(EnvFlags::INIT_MPOOL | EnvFlags::PRIVATE);
        env.cache_size = DEFAULT_CACHE_SIZE;
        env.mmap_size = DEFAULT_MMAP_SIZE;
        Arc::new(env)
    }

    fn with_flags(flags: EnvFlags) -> Self {
        Self {
            id: NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed),
            flags,
            home: None,
            data_dir: None,
            cache_size: 0,
            mmap_size: 0,
            lock_timeout: None,
            lock: Lock::default(),
            tables: Default::default(),
            next_table: AtomicU64::new(1),
            next_txn: AtomicU32::new(0x8000_0000),
            panicked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn transactional(&self) -> bool {
        self.flags.contains(EnvFlags::INIT_TXN)
    }

    /// Fails once the environment was closed or has panicked.
    #[inline]
    pub(crate) fn check(&self) -> Result<(), Status> {
        if self.panicked.load(Ordering::Acquire) {
            Err(Status::RUNRECOVERY)
        } else if self.closed.load(Ordering::Acquire) {
            Err(Status::EINVAL)
        } else {
            Ok(())
        }
    }

    /// Marks the environment as damaged, every later call reports run-recovery.
    pub(crate) fn panic(&self) {
        tracing::error!(id = self.id, "environment panic, recovery required");
        self.panicked.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) -> Result<(), Status> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(id = self.id, "closed environment");
        if self.panicked.load(Ordering::Acquire) {
            Err(Status::RUNRECOVERY)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub(crate) fn next_table_id(&self) -> u64 {
        self.next_table.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn next_txn_id(&self) -> u32 {
        self.next_txn.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves a database path against the home and data directories.
    pub(crate) fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let mut base = self.home.clone().unwrap_or_default();
        if let Some(data_dir) = &self.data_dir {
            base.push(data_dir);
        }
        base.join(path)
    }

    fn config_file(&self) -> Result<Vec<(String, String)>, Status> {
        let Some(home) = &self.home else {
            return Ok(Vec::new());
        };
        let text = match fs::read_to_string(home.join(CONFIG_FILE)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Status::from_io(&err)),
        };

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| match line.split_once(char::is_whitespace) {
                Some((name, value)) => (name.to_string(), value.trim().to_string()),
                None => (line.to_string(), String::new()),
            })
            .collect())
    }

    fn apply_config(&mut self, name: &str, value: &str) -> Result<(), Status> {
        let args = value.split_whitespace().collect::<Vec<_>>();
        let number = |idx: usize| -> Result<u64, Status> {
            args.get(idx)
                .and_then(|arg| arg.parse().ok())
                .ok_or(Status::EINVAL)
        };

        match name {
            "set_cachesize" => {
                let (gbytes, bytes) = (number(0)?, number(1)?);
                self.cache_size = gbytes
                    .checked_mul(1 << 30)
                    .and_then(|size| size.checked_add(bytes))
                    .ok_or(Status::EINVAL)?;
            }
            "set_mp_mmapsize" => self.mmap_size = number(0)?,
            "set_lock_timeout" => self.lock_timeout = Some(Duration::from_micros(number(0)?)),
            "set_data_dir" if args.len() == 1 => self.data_dir = Some(PathBuf::from(args[0])),
            _ => {
                tracing::error!(name, value, "unrecognized name-value pair");
                return Err(Status::EINVAL);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, time::Duration};

    use super::NativeEnv;
    use crate::{
        env::{EnvFlags, EnvOptions},
        status::Status,
    };

    #[test]
    fn test_config() {
        let home = "target/native_env_config";
        fs::create_dir_all(home).unwrap();
        fs::write(
            Path::new(home).join("DB_CONFIG"),
            "# tuning\nset_cachesize 0 1048576 1\nset_data_dir data\n",
        )
        .unwrap();

        let mut options = EnvOptions::new();
        options
            .home(home)
            .init_txn(true)
            .config("set_lock_timeout", "2500");
        let env = NativeEnv::open(&options).unwrap();

        assert!(env.transactional());
        assert!(env.flags.contains(EnvFlags::INIT_LOG | EnvFlags::INIT_MPOOL));
        assert_eq!(env.cache_size, 1 << 20);
        assert_eq!(env.lock_timeout, Some(Duration::from_micros(2500)));
        assert_eq!(
            env.resolve(Path::new("x.db")),
            Path::new(home).join("data").join("x.db")
        );

        fs::remove_file(Path::new(home).join("DB_CONFIG")).unwrap();
    }

    #[test]
    fn test_rejected() {
        let mut options = EnvOptions::new();
        options.config("set_page_size", "4096");
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::EINVAL));

        let mut options = EnvOptions::new();
        options.config("set_cachesize", "lots");
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::EINVAL));

        let mut options = EnvOptions::new();
        options.config("set_cachesize", "17179869184 0 1");
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::EINVAL));

        let mut options = EnvOptions::new();
        options.config("set_cachesize", &format!("1 {} 1", u64::MAX));
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::EINVAL));

        let mut options = EnvOptions::new();
        options.server("db.example.org", 10, 20);
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::NOSERVER));

        let mut options = EnvOptions::new();
        options.home("target/native_env_missing_home");
        assert_eq!(NativeEnv::open(&options).err(), Some(Status::ENOENT));
    }

    #[test]
    fn test_lifecycle() {
        let env = NativeEnv::open(&EnvOptions::new()).unwrap();
        assert!(!env.transactional());
        assert_eq!(env.check(), Ok(()));

        env.panic();
        assert_eq!(env.check(), Err(Status::RUNRECOVERY));
        assert_eq!(env.close(), Err(Status::RUNRECOVERY));
        assert_eq!(env.close(), Ok(()));
    }
}
