pub mod clock;
pub mod config;
pub mod display;
pub mod dsp;
pub mod error;
#[cfg(feature = "wav")]
pub mod recording;
pub mod timegrapher;

use crate::config::TimegrapherConfig;
use crate::dsp::peak::PeakDetectionMethod;
use crate::timegrapher::Timegrapher;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the timegrapher-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

#[wasm_bindgen]
extern "C" {
    /// A JS function taking the new scroll fraction.
    #[wasm_bindgen(typescript_type = "(fraction: number) => void")]
    pub type ScrollCallback;

    #[wasm_bindgen(method, catch)]
    fn call(this: &ScrollCallback, context: &JsValue, fraction: f64) -> Result<JsValue, JsValue>;
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed timegrapher session.
///
/// The AudioWorklet pushes captured blocks with `pushSamples`; the UI calls
/// `scan` on a timer and `view` once per animation frame, and follows
/// session-driven scroll changes through `onScrollFractionChanged`.
#[wasm_bindgen]
pub struct WasmTimegrapher {
    inner: Timegrapher,
}

#[wasm_bindgen]
impl WasmTimegrapher {
    /// `config_json` may be empty for defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, sample_rate: f64) -> Result<WasmTimegrapher, JsValue> {
        let config = if config_json.trim().is_empty() {
            TimegrapherConfig::default()
        } else {
            TimegrapherConfig::from_json(config_json).map_err(to_js_error)?
        };
        let inner = Timegrapher::new(config, sample_rate).map_err(to_js_error)?;
        Ok(WasmTimegrapher { inner })
    }

    #[wasm_bindgen(js_name = pushSamples)]
    pub fn push_samples(&mut self, end_timestamp: f64, samples: &[f32]) {
        self.inner.push_samples(end_timestamp, samples);
    }

    /// Returns the number of new ticks.
    pub fn scan(&mut self) -> usize {
        self.inner.scan()
    }

    /// Current frame view as a JS object, or `null` before the first tick.
    pub fn view(&mut self) -> Result<JsValue, JsValue> {
        match self.inner.view() {
            Some(view) => serde_wasm_bindgen::to_value(&view).map_err(to_js_error),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = tickTimes)]
    pub fn tick_times(&self) -> Vec<f64> {
        self.inner.tick_times().to_vec()
    }

    #[wasm_bindgen(js_name = scrollFraction)]
    pub fn scroll_fraction(&self) -> f64 {
        self.inner.scroll_fraction()
    }

    /// Call `callback(fraction)` whenever the session moves the scroll position
    /// itself: a pinned viewport re-deriving its fraction, or `clear`.
    #[wasm_bindgen(js_name = onScrollFractionChanged)]
    pub fn on_scroll_fraction_changed(&mut self, callback: ScrollCallback) {
        self.inner.on_scroll_fraction_changed(move |fraction| {
            if let Err(e) = callback.call(&JsValue::NULL, fraction) {
                log::warn!("Scroll fraction callback threw: {e:?}");
            }
        });
    }

    #[wasm_bindgen(js_name = setScrollFraction)]
    pub fn set_scroll_fraction(&mut self, fraction: f64) {
        self.inner.set_scroll_fraction(fraction);
    }

    #[wasm_bindgen(js_name = setBph)]
    pub fn set_bph(&mut self, bph: f64) -> Result<(), JsValue> {
        self.inner.set_bph(bph).map_err(to_js_error)
    }

    /// Accepts `"maxMagnitude"` or `"thresholdCrossing"`.
    #[wasm_bindgen(js_name = setPeakDetectionMethod)]
    pub fn set_peak_detection_method(&mut self, method: JsValue) -> Result<(), JsValue> {
        let method: PeakDetectionMethod = serde_wasm_bindgen::from_value(method).map_err(to_js_error)?;
        self.inner.set_peak_detection_method(method);
        Ok(())
    }

    #[wasm_bindgen(js_name = setDbCutoff)]
    pub fn set_db_cutoff(&mut self, db_cutoff: f64) -> Result<(), JsValue> {
        self.inner.set_db_cutoff(db_cutoff).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = setMaxFramesVisible)]
    pub fn set_max_frames_visible(&mut self, max_frames_visible: usize) {
        self.inner.set_max_frames_visible(max_frames_visible);
    }

    #[wasm_bindgen(js_name = setUseNetworkTime)]
    pub fn set_use_network_time(&mut self, enabled: bool) {
        self.inner.set_use_network_time(enabled);
    }

    /// Drift rate reported by the host's clock sync, or `undefined` to clear.
    #[wasm_bindgen(js_name = setDriftRate)]
    pub fn set_drift_rate(&mut self, drift_rate: Option<f64>) {
        self.inner.set_drift_rate(drift_rate);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
