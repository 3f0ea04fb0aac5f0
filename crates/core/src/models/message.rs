/// 队列投递句柄，用于 ack/nack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle {
    pub queue: String,
    pub delivery_tag: u64,
}

/// 一条未确认的队列消息
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub data: Vec<u8>,
    pub redelivered: bool,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, delivery_tag: u64, data: Vec<u8>) -> Self {
        Self {
            handle: DeliveryHandle {
                queue: queue.into(),
                delivery_tag,
            },
            data,
            redelivered: false,
        }
    }
}
