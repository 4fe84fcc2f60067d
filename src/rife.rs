use std::path::Path;

use anyhow::{Context, Result, bail};

/// Engine configuration: GPU selection, threading, padding, and
/// model-family flags.
#[derive(Debug, Clone)]
pub struct RifeConfig {
    pub gpu_id: i32,
    pub tta_mode: bool,
    pub tta_temporal: bool,
    pub uhd_mode: bool,
    pub num_threads: i32,
    pub rife_v2: bool,
    pub rife_v4: bool,
    pub padding: i32,
}

impl Default for RifeConfig {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            tta_mode: false,
            tta_temporal: false,
            uhd_mode: false,
            num_threads: 1,
            rife_v2: false,
            rife_v4: true,
            padding: 64,
        }
    }
}

/// Opaque binding to the frame interpolation engine.
///
/// The engine is stateless between `interpolate` calls apart from model
/// residency. By contract `t == 0` returns the first frame and `t == 1` the
/// second, so those calls short-circuit without touching the engine.
///
/// With the `rife-vulkan` feature the native ncnn/Vulkan wrapper is linked;
/// the default build substitutes a software blend kernel with the identical
/// surface so the pipeline runs without the GPU toolchain.
pub struct Rife {
    width: u32,
    height: u32,
    engine: backend::Engine,
}

impl Rife {
    pub fn new(width: u32, height: u32, config: RifeConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("interpolator dimensions must be nonzero, got {width}x{height}");
        }
        Ok(Self {
            width,
            height,
            engine: backend::Engine::create(&config)?,
        })
    }

    /// Load model weights from `model_dir`. The directory must exist.
    pub fn load_model(&mut self, model_dir: &Path) -> Result<()> {
        let abs = std::path::absolute(model_dir)
            .with_context(|| format!("resolving model path {}", model_dir.display()))?;
        if !abs.is_dir() {
            bail!("model directory {} does not exist", abs.display());
        }
        self.engine.load(&abs)
    }

    /// Synthesize the frame at temporal position `t` between `a` and `b`.
    /// Both buffers must be `width * height * 3` bytes; the result always
    /// is.
    pub fn interpolate(&self, a: &[u8], b: &[u8], t: f32) -> Result<Vec<u8>> {
        if t == 0.0 {
            return Ok(a.to_vec());
        }
        if t == 1.0 {
            return Ok(b.to_vec());
        }

        let expected = self.frame_size();
        if a.len() != expected || b.len() != expected {
            bail!(
                "invalid frame buffer size: expected {expected}, got {} and {}",
                a.len(),
                b.len()
            );
        }

        self.engine.process(a, b, self.width, self.height, t)
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[cfg(feature = "rife-vulkan")]
mod backend {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_float, c_int, c_uchar};
    use std::path::Path;

    use anyhow::{Result, bail};

    use super::RifeConfig;

    #[repr(C)]
    struct RifeCtx {
        _private: [u8; 0],
    }

    #[link(name = "rife_ncnn_vulkan_wrapper")]
    unsafe extern "C" {
        fn rife_create(
            gpu_id: c_int,
            tta_mode: c_int,
            tta_temporal: c_int,
            uhd_mode: c_int,
            num_threads: c_int,
            rife_v2: c_int,
            rife_v4: c_int,
            padding: c_int,
        ) -> *mut RifeCtx;
        fn rife_load(ctx: *mut RifeCtx, model_dir: *const c_char) -> c_int;
        fn rife_process_frames(
            ctx: *mut RifeCtx,
            frame_a: *const c_uchar,
            frame_b: *const c_uchar,
            width: c_int,
            height: c_int,
            elempack: c_int,
            out: *mut c_uchar,
            timestep: c_float,
        ) -> c_int;
        fn rife_destroy(ctx: *mut RifeCtx);
    }

    pub(super) struct Engine {
        ctx: *mut RifeCtx,
    }

    // The engine context never leaves the worker that created it; the raw
    // pointer is only touched from that worker's task.
    unsafe impl Send for Engine {}

    impl Engine {
        pub(super) fn create(config: &RifeConfig) -> Result<Self> {
            let ctx = unsafe {
                rife_create(
                    config.gpu_id,
                    config.tta_mode.into(),
                    config.tta_temporal.into(),
                    config.uhd_mode.into(),
                    config.num_threads,
                    config.rife_v2.into(),
                    config.rife_v4.into(),
                    config.padding,
                )
            };
            if ctx.is_null() {
                bail!("failed to create interpolation engine context");
            }
            Ok(Self { ctx })
        }

        pub(super) fn load(&mut self, model_dir: &Path) -> Result<()> {
            let c_dir = CString::new(model_dir.to_string_lossy().as_bytes())?;
            let code = unsafe { rife_load(self.ctx, c_dir.as_ptr()) };
            if code != 0 {
                bail!(
                    "failed to load model from {}, error code {code}",
                    model_dir.display()
                );
            }
            Ok(())
        }

        pub(super) fn process(
            &self,
            a: &[u8],
            b: &[u8],
            width: u32,
            height: u32,
            t: f32,
        ) -> Result<Vec<u8>> {
            let mut out = vec![0u8; a.len()];
            let code = unsafe {
                rife_process_frames(
                    self.ctx,
                    a.as_ptr(),
                    b.as_ptr(),
                    width as c_int,
                    height as c_int,
                    3,
                    out.as_mut_ptr(),
                    t,
                )
            };
            if code != 0 {
                bail!("interpolation failed with error code {code}");
            }
            Ok(out)
        }
    }

    impl Drop for Engine {
        fn drop(&mut self) {
            if !self.ctx.is_null() {
                unsafe { rife_destroy(self.ctx) };
                self.ctx = std::ptr::null_mut();
            }
        }
    }
}

#[cfg(not(feature = "rife-vulkan"))]
mod backend {
    use std::path::Path;

    use anyhow::{Result, bail};

    use super::RifeConfig;

    /// Software fallback: a per-pixel linear blend. Motion-free, but it
    /// honors the full engine contract (model residency, buffer sizing,
    /// timestep semantics) so the pipeline behaves identically.
    pub(super) struct Engine {
        model_loaded: bool,
    }

    impl Engine {
        pub(super) fn create(_config: &RifeConfig) -> Result<Self> {
            Ok(Self {
                model_loaded: false,
            })
        }

        pub(super) fn load(&mut self, _model_dir: &Path) -> Result<()> {
            self.model_loaded = true;
            Ok(())
        }

        pub(super) fn process(
            &self,
            a: &[u8],
            b: &[u8],
            _width: u32,
            _height: u32,
            t: f32,
        ) -> Result<Vec<u8>> {
            if !self.model_loaded {
                bail!("no model loaded");
            }
            let t = f64::from(t);
            let out = a
                .iter()
                .zip(b.iter())
                .map(|(&pa, &pb)| {
                    let blended = f64::from(pa) * (1.0 - t) + f64::from(pb) * t;
                    blended.round().clamp(0.0, 255.0) as u8
                })
                .collect();
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_rife(width: u32, height: u32) -> Rife {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut rife = Rife::new(width, height, RifeConfig::default()).expect("create engine");
        rife.load_model(dir.path()).expect("load model");
        // Leak the tempdir so the model path stays valid for the test body.
        std::mem::forget(dir);
        rife
    }

    #[test]
    fn zero_and_one_timesteps_return_the_inputs() {
        let rife = loaded_rife(2, 1);
        let a = vec![10u8, 20, 30, 40, 50, 60];
        let b = vec![110u8, 120, 130, 140, 150, 160];

        assert_eq!(rife.interpolate(&a, &b, 0.0).expect("t=0"), a);
        assert_eq!(rife.interpolate(&a, &b, 1.0).expect("t=1"), b);
    }

    #[test]
    fn midpoint_frame_has_input_dimensions() {
        let rife = loaded_rife(2, 1);
        let a = vec![0u8; 6];
        let b = vec![200u8; 6];

        let mid = rife.interpolate(&a, &b, 0.5).expect("t=0.5");
        assert_eq!(mid.len(), rife.frame_size());
        #[cfg(not(feature = "rife-vulkan"))]
        assert!(mid.iter().all(|&px| px == 100));
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let rife = loaded_rife(2, 2);
        let a = vec![0u8; 5];
        let b = vec![0u8; 12];

        let err = rife.interpolate(&a, &b, 0.5).expect_err("size mismatch");
        assert!(err.to_string().contains("buffer size"), "got: {err:#}");
    }

    #[test]
    fn missing_model_directory_fails() {
        let mut rife = Rife::new(2, 2, RifeConfig::default()).expect("create engine");
        let err = rife
            .load_model(Path::new("/definitely/not/a/model/dir"))
            .expect_err("missing dir must fail");
        assert!(err.to_string().contains("does not exist"), "got: {err:#}");
    }

    #[test]
    fn interpolating_without_a_model_fails() {
        let rife = Rife::new(2, 1, RifeConfig::default()).expect("create engine");
        let a = vec![0u8; 6];
        let b = vec![0u8; 6];
        // The t=0 contract short-circuit still works without a model.
        assert!(rife.interpolate(&a, &b, 0.0).is_ok());
        #[cfg(not(feature = "rife-vulkan"))]
        assert!(rife.interpolate(&a, &b, 0.5).is_err());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(Rife::new(0, 10, RifeConfig::default()).is_err());
    }
}
