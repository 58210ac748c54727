//! Presets command - list the named model presets.

use segflow_core::task::PRESET_TASK_TAGS;

/// Print one `label<TAB>dataset` line per preset.
pub fn run() {
    for (label, dataset, _) in PRESET_TASK_TAGS {
        println!("{label}\t{dataset}");
    }
}
