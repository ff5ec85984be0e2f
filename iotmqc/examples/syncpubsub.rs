use std::thread;
use std::time::Duration;

use iotmqc::{Callbacks, Client, LastWill, OptionBuilder, QoS};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let will = LastWill::new("hello/world", "good bye", QoS::AtMostOnce, false);
    let options = OptionBuilder::new_tcp("localhost", 1883)
        .client_id("test-1")
        .keep_alive(Duration::from_secs(5))
        .last_will(will)
        .finalize();

    let callbacks = Callbacks::new()
        .on_connection_interrupted(|e| println!("Interrupted = {e}"))
        .on_connection_resumed(|r| println!("Resumed = {r:?}"))
        .on_message(|m| println!("Unrouted = {m:?}"));

    let client = Client::new(options, callbacks)?;
    client.connect().wait()?;

    client
        .subscribe("hello/+/world", QoS::AtLeastOnce, |m| {
            println!("Topic = {}, Payload = {:?}", m.topic, m.payload)
        })
        .wait()?;

    let publisher = client.clone();
    let handle = thread::spawn(move || {
        for i in 0..3 {
            let payload = vec![1; i];
            let topic = format!("hello/{i}/world");
            match publisher.publish(topic, payload, QoS::AtLeastOnce, false).wait() {
                Ok(ack) => println!("Acked = {ack:?}"),
                Err(e) => println!("Publish failed = {e}"),
            }
        }
    });

    let _ = handle.join();
    thread::sleep(Duration::from_secs(1));
    client.disconnect().wait()?;
    Ok(())
}
