//! The resource manager: OpenCL context, per-device command queues, the
//! program cache, and the buffer pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use ocl::{Context, Device, Kernel, Platform, Program, Queue};

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::{Error, Result};

/// Which device class the manager opens its context over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    All,
}

impl DeviceClass {
    fn to_flags(self) -> ocl::DeviceType {
        match self {
            DeviceClass::Cpu => ocl::flags::DEVICE_TYPE_CPU,
            DeviceClass::Gpu => ocl::flags::DEVICE_TYPE_GPU,
            DeviceClass::All => ocl::flags::DEVICE_TYPE_ALL,
        }
    }
}

/// Manager configuration, applied lazily when the OpenCL state is first
/// touched.
#[derive(Clone, Debug)]
pub struct Config {
    pub platform_index: Option<usize>,
    pub device_type: DeviceClass,
    pub kernel_paths: Vec<PathBuf>,
    pub build_options: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            platform_index: None,
            device_type: DeviceClass::All,
            kernel_paths: vec![PathBuf::from(".")],
            build_options: String::new(),
        }
    }
}

impl Config {
    /// Builds a default configuration and folds in `ENGINE_KERNEL_PATH`
    /// (colon-separated directories, searched first).
    pub fn from_env() -> Config {
        let mut config = Config::default();
        if let Ok(paths) = std::env::var("ENGINE_KERNEL_PATH") {
            let mut dirs: Vec<PathBuf> =
                paths.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect();
            dirs.append(&mut config.kernel_paths);
            config.kernel_paths = dirs;
        }
        config
    }
}

/// A per-device handle handed to the scheduler when it expands a graph
/// region across devices.
#[derive(Clone, Debug)]
pub struct GpuNode {
    pub index: usize,
    pub queue: Queue,
}

struct ClState {
    context: Context,
    devices: Vec<Device>,
    queues: Vec<Queue>,
    programs: Mutex<HashMap<(PathBuf, String), Program>>,
}

#[derive(Default)]
struct PoolInner {
    free: HashMap<Dims, Vec<Buffer>>,
    in_use: usize,
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Owns every shared resource of one scheduler: the GPU context, one
/// command queue per device, compiled programs, and the buffer pool.
///
/// One instance per scheduler; tasks receive it by reference during
/// `setup` and must not hold clones of its internals beyond `finalize`.
/// The OpenCL runtime is only touched once something actually needs a
/// device, so purely host-side graphs run on machines without OpenCL.
pub struct ResourceManager {
    config: Mutex<Config>,
    pool_id: usize,
    cl: Mutex<Option<Arc<ClState>>>,
    pool: Mutex<PoolInner>,
}

impl ResourceManager {
    pub fn new(config: Config) -> ResourceManager {
        ResourceManager {
            config: Mutex::new(config),
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            cl: Mutex::new(None),
            pool: Mutex::new(PoolInner::default()),
        }
    }

    /// Replaces the configuration. Has no effect on already-initialized
    /// OpenCL state; call before the first device operation.
    pub fn set_configuration(&self, config: Config) {
        if self.cl.lock().unwrap().is_some() {
            warn!("set_configuration called after OpenCL initialization; ignored for CL state");
        }
        *self.config.lock().unwrap() = config;
    }

    /// True when at least one OpenCL platform is present on this machine.
    pub fn cl_available() -> bool {
        ocl::core::get_platform_ids().map(|ids| !ids.is_empty()).unwrap_or(false)
    }

    fn cl(&self) -> Result<Arc<ClState>> {
        let mut slot = self.cl.lock().unwrap();
        if let Some(ref state) = *slot {
            return Ok(state.clone());
        }

        let config = self.config.lock().unwrap().clone();
        let platform = match config.platform_index {
            Some(index) => {
                let platforms = ocl::core::get_platform_ids()
                    .map_err(|e| Error::Ocl(e.to_string()))?;
                let id = platforms
                    .get(index)
                    .copied()
                    .ok_or_else(|| Error::Ocl(format!("no OpenCL platform at index {}", index)))?;
                Platform::new(id)
            }
            None => Platform::first()?,
        };

        let devices = Device::list(platform, Some(config.device_type.to_flags()))
            .map_err(|e| Error::Ocl(e.to_string()))?;
        if devices.is_empty() {
            return Err(Error::Ocl(format!(
                "no devices of class {:?} on platform {}",
                config.device_type,
                platform.name().unwrap_or_else(|_| "?".into()),
            )));
        }

        let context = Context::builder()
            .platform(platform)
            .devices(&devices)
            .build()?;

        let mut queues = Vec::with_capacity(devices.len());
        for device in &devices {
            queues.push(Queue::new(&context, *device, None)?);
        }

        let state = Arc::new(ClState {
            context,
            devices,
            queues,
            programs: Mutex::new(HashMap::new()),
        });
        *slot = Some(state.clone());
        Ok(state)
    }

    pub fn context(&self) -> Result<Context> {
        Ok(self.cl()?.context.clone())
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.cl()?.devices.clone())
    }

    /// The command queue serving device `index`.
    pub fn queue(&self, index: usize) -> Result<Queue> {
        let state = self.cl()?;
        state
            .queues
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Ocl(format!("no command queue for device index {}", index)))
    }

    /// Per-device handles for graph expansion. Empty when the OpenCL
    /// runtime is unavailable, which simply disables replication.
    pub fn gpu_nodes(&self) -> Vec<GpuNode> {
        match self.cl() {
            Ok(state) => state
                .queues
                .iter()
                .enumerate()
                .map(|(index, queue)| GpuNode { index, queue: queue.clone() })
                .collect(),
            Err(err) => {
                debug!("no compute devices for expansion: {}", err);
                Vec::new()
            }
        }
    }

    /// Checks a buffer of the given shape out of the pool, allocating one
    /// lazily if no idle buffer of that shape exists.
    pub fn request_buffer<D: Into<Dims>>(&self, dims: D) -> Result<Buffer> {
        let dims = dims.into();
        let mut pool = self.pool.lock().unwrap();
        let mut buf = pool
            .free
            .get_mut(&dims)
            .and_then(|list| list.pop())
            .unwrap_or_else(|| Buffer::new(dims));
        buf.set_origin(Some(self.pool_id));
        buf.reset_for_reuse();
        pool.in_use += 1;
        Ok(buf)
    }

    /// Returns a checked-out buffer to its free-list. Storage and residency
    /// are preserved for reuse; consumers must not rely on residual
    /// contents. Poisoned buffers are dropped rather than recycled.
    pub fn release_buffer(&self, mut buf: Buffer) {
        if buf.origin() != Some(self.pool_id) {
            warn!("released a buffer that does not belong to this pool; dropping it");
            return;
        }
        let mut pool = self.pool.lock().unwrap();
        pool.in_use = pool.in_use.saturating_sub(1);
        if buf.is_poisoned() {
            return;
        }
        buf.set_origin(None);
        pool.free.entry(buf.dims()).or_default().push(buf);
    }

    /// Number of buffers currently checked out of the pool.
    pub fn in_use_count(&self) -> usize {
        self.pool.lock().unwrap().in_use
    }

    /// Number of idle buffers across all free-lists.
    pub fn idle_count(&self) -> usize {
        self.pool.lock().unwrap().free.values().map(Vec::len).sum()
    }

    fn resolve_kernel_file(&self, source: &str) -> Result<PathBuf> {
        let direct = Path::new(source);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        let config = self.config.lock().unwrap();
        for dir in &config.kernel_paths {
            let candidate = dir.join(source);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(Error::KernelNotFound(source.to_string()))
    }

    /// Compiles (or fetches from cache) the program in `source` and
    /// returns a fresh kernel for `entry` with `n_bufs` unset buffer
    /// arguments.
    ///
    /// The cached artifact is the compiled program, keyed by source file
    /// and build flags; kernel objects carry mutable argument state and are
    /// created anew for every caller.
    pub fn kernel(&self, source: &str, entry: &str, build_flags: &str, n_bufs: usize)
            -> Result<Kernel> {
        let program = self.program(source, build_flags)?;
        let mut builder = Kernel::builder();
        builder.program(&program).name(entry);
        for _ in 0..n_bufs {
            builder.arg(None::<&ocl::Buffer<f32>>);
        }
        builder.build().map_err(Error::from)
    }

    /// The compiled program for `(source, build_flags)`, building it on a
    /// cache miss. The configuration's global `build_options` are applied
    /// in front of the per-call flags.
    pub fn program(&self, source: &str, build_flags: &str) -> Result<Program> {
        let path = self.resolve_kernel_file(source)?;
        let state = self.cl()?;

        let mut flags = self.config.lock().unwrap().build_options.clone();
        if !build_flags.is_empty() {
            if !flags.is_empty() {
                flags.push(' ');
            }
            flags.push_str(build_flags);
        }
        let key = (path.clone(), flags.clone());

        let mut programs = state.programs.lock().unwrap();
        if let Some(program) = programs.get(&key) {
            return Ok(program.clone());
        }

        let src = fs::read_to_string(&path)?;
        let mut builder = Program::builder();
        builder.src(src).devices(&state.devices);
        if !flags.is_empty() {
            builder.cmplr_opt(flags.clone());
        }
        let program = builder
            .build(&state.context)
            .map_err(|e| Error::KernelBuild(e.to_string()))?;

        debug!("compiled kernel source {:?} (flags: {:?})", path, flags);
        programs.insert(key, program.clone());
        Ok(program)
    }
}
