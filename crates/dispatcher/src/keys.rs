//! 临时存储中的键布局

/// 司机位置地理索引
pub const DRIVER_LOCATIONS: &str = "drivers:locations";

/// 可接单标记，存在即表示司机可被派单
pub fn availability(driver_id: &str) -> String {
    format!("driver:{driver_id}:available")
}

/// 派单租约，值为订单号
pub fn lease(driver_id: &str) -> String {
    format!("driver:{driver_id}:lock")
}

/// 司机对某订单的应答信号
pub fn acceptance(driver_id: &str, order_id: &str) -> String {
    format!("driver:{driver_id}:accept:{order_id}")
}

/// 司机当前承接的订单
pub fn assigned_job(driver_id: &str) -> String {
    format!("driver:{driver_id}:assignedJob")
}

/// 司机资料哈希（lat、lng、availableAt）
pub fn profile(driver_id: &str) -> String {
    format!("driver:{driver_id}")
}

/// 可接单标记的值
pub const AVAILABLE: &str = "1";
