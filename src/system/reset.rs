/// Reset reason reporting and controlled restarts

use log::info;

/// Restart after letting the last status and log lines get out.
pub fn restart(reason: &str) -> ! {
    info!("Restarting: {}", reason);

    // Ensure log is flushed
    log::logger().flush();

    // Small delay to ensure UART output completes
    esp_idf_hal::delay::FreeRtos::delay_ms(100);

    esp_idf_hal::reset::restart()
}

/// Get the last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_UNKNOWN => "Unknown",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SDIO => "SDIO",
        _ => "Unknown reason code",
    }
}

/// Panics and watchdog resets are worth a warning line at boot
pub fn was_abnormal_reset() -> bool {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };
    matches!(
        reason,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT
    )
}
