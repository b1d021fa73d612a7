//! Offline document formats besides the environment document.
mod growthbook;
mod launchdarkly;

pub use growthbook::{GrowthBookFeature, GrowthBookFeatures, GrowthBookRule};
pub use launchdarkly::{Fallthrough, LaunchDarklyFlag, LaunchDarklyFlagFile, LaunchDarklyTarget};
