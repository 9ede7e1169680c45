//! Publishes a single "Hello world!" to `tutorial/topic` and exits.

use pubsub_client::{
    cli::{init_tracing, SampleArgs},
    message::{InboundMessage, MessageDestination, OutboundMessageBuilder},
    session::SessionEvent,
    transport::tcp::TcpConnector,
    Context,
};

const TOPIC: &str = "tutorial/topic";

fn main() {
    let (args, endpoint) = SampleArgs::parse_or_exit("publisher");
    init_tracing(args.verbose);
    println!("Publisher initializing...");

    let context = Context::new(TcpConnector::new());
    println!(" Connecting session to {} ...", endpoint);
    let session = context
        .session(
            endpoint,
            None::<fn(InboundMessage)>,
            Some(|e: SessionEvent| println!(" Received session event: {}", e)),
        )
        .expect("Could not create session");

    let content = "Hello world!";
    let message = OutboundMessageBuilder::new()
        .destination(MessageDestination::new(TOPIC).expect("valid topic"))
        .payload(content)
        .build()
        .expect("could not build message");

    println!(" Sending message with content: {}", content);
    session.publish(message).expect("message to be sent");
    println!(" Message sent. Exiting.");

    session.disconnect();
}
