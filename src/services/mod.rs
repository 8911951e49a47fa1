pub mod completion;
pub mod partner_client;
pub mod poller;
pub mod receiver;
pub mod signature;

pub use completion::{
    CompletionConsumer, CompletionDispatcher, Delivery, Finalize, FinalizedStore, LoggingConsumer,
    MemoryFinalizedStore, WatchingConsumer,
};
pub use partner_client::PartnerClient;
pub use poller::{PollOutcome, PollSettings, Poller, StatusSource};
pub use receiver::{WebhookOutcome, WebhookReceiver};
pub use signature::WebhookSigner;
