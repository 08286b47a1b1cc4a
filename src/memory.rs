/// Heap diagnostics around firmware transfers
use esp_idf_sys::*;

/// Log current internal heap state
pub fn log_memory_state(label: &str) {
    unsafe {
        let internal_free = heap_caps_get_free_size(MALLOC_CAP_INTERNAL);
        let internal_largest = heap_caps_get_largest_free_block(MALLOC_CAP_INTERNAL);
        let internal_min = heap_caps_get_minimum_free_size(MALLOC_CAP_INTERNAL);

        // Get current task stack watermark
        let stack_watermark = uxTaskGetStackHighWaterMark(std::ptr::null_mut());

        log::info!(
            "Memory [{}]: internal free={} KB, largest={} KB, min={} KB, stack remaining={} bytes",
            label,
            internal_free / 1024,
            internal_largest / 1024,
            internal_min / 1024,
            stack_watermark
        );

        if internal_largest < 4096 {
            log::error!("Internal DRAM largest block < 4KB!");
        }
    }
}

/// Free internal heap in bytes, the figure the direct-flash gate is checked against
pub fn free_internal_heap() -> usize {
    unsafe { heap_caps_get_free_size(MALLOC_CAP_INTERNAL) }
}
