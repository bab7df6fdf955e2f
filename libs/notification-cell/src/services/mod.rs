// libs/notification-cell/src/services/mod.rs
pub mod dispatch;
pub mod email;
pub mod push;
pub mod retry;
pub mod routing;
pub mod template;
pub mod whatsapp;
pub mod worker;

pub use dispatch::ChannelDispatcher;
pub use email::EmailDispatcher;
pub use push::PushDispatcher;
pub use retry::{RetryEngine, RetryPolicy, RetryVerdict, Sleeper, TokioSleeper};
pub use routing::NotificationRouter;
pub use whatsapp::WhatsappDispatcher;
pub use worker::NotificationWorkerService;
