//! Subscribes to `tutorial/topic`, waits for one message, prints it and
//! exits.

use pubsub_client::{
    cli::{init_tracing, SampleArgs},
    message::{InboundMessage, Message},
    session::{ConfirmMode, SessionEvent},
    transport::tcp::TcpConnector,
    Context,
};

const TOPIC: &str = "tutorial/topic";

fn main() {
    let (args, endpoint) = SampleArgs::parse_or_exit("subscriber");
    init_tracing(args.verbose);
    println!("Subscriber initializing...");

    let on_message = |message: InboundMessage| {
        println!();
        println!(
            " Received a message with content: {}",
            String::from_utf8_lossy(message.get_payload())
        );
        println!(" Complete message dump:");
        println!("{}", message.dump());
    };

    let context = Context::new(TcpConnector::new());
    println!(" Connecting session to {} ...", endpoint);
    let session = context
        .session(
            endpoint,
            Some(on_message),
            Some(|e: SessionEvent| println!(" Received session event: {}", e)),
        )
        .expect("Could not create session");

    println!(" Subscribing to topic: {}", TOPIC);
    session
        .subscribe(TOPIC, ConfirmMode::WaitForConfirm)
        .expect("Could not subscribe to topic");

    println!(" Subscribed. Awaiting message...");
    session
        .wait_for_message(None)
        .expect("session closed before a message arrived");

    println!(" Exiting.");
    session.disconnect();
}
