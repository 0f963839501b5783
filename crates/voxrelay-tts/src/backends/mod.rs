//! Vendor backends.

#[cfg(feature = "elevenlabs")]
pub mod elevenlabs;
#[cfg(feature = "minimax")]
pub mod minimax;
#[cfg(feature = "tencent")]
pub mod tencent;

#[cfg(any(feature = "elevenlabs", feature = "minimax", feature = "tencent"))]
pub(crate) mod util {
    use crate::error::TtsError;
    use serde_json::{Map, Value};

    /// Turn a non-success HTTP response into a vendor error carrying the
    /// status code and whatever body the vendor sent.
    pub async fn vendor_error(provider: &'static str, resp: reqwest::Response) -> TtsError {
        let code = resp.status().as_u16() as i64;
        let message = resp.text().await.unwrap_or_default();
        TtsError::Vendor {
            provider,
            code,
            message,
        }
    }

    /// Merge vendor-specific `extra` overrides into mapped parameters,
    /// last-write-wins. Keys named in `deep_keys` holding objects on both
    /// sides are merged one level deep instead of replaced, so a caller can
    /// override a single nested setting without clobbering the rest.
    pub fn merge_extra(base: &mut Map<String, Value>, extra: &Map<String, Value>, deep_keys: &[&str]) {
        for (key, value) in extra {
            let deep = deep_keys.contains(&key.as_str());
            match (deep, base.get_mut(key), value) {
                (true, Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
        value.clamp(min, max)
    }

}
