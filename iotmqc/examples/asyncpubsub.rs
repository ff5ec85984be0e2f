use std::time::Duration;

use iotmqc::{Callbacks, Client, OptionBuilder, QoS};
use tokio::time;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let options = OptionBuilder::new_tcp("localhost", 1883)
        .client_id("test-2")
        .keep_alive(Duration::from_secs(5))
        .max_inflight(5)
        .finalize();

    let callbacks = Callbacks::new().on_resubscribe_complete(|r| println!("Resubscribed = {r:?}"));
    let client = Client::new(options, callbacks)?;
    client.connect().await?;

    let granted = client
        .subscribe("hello/world", QoS::AtMostOnce, |m| println!("Incoming = {m:?}"))
        .await?;
    println!("Subscribed = {granted:?}");

    // notices are independent futures, publishes beyond the inflight limit queue up
    let notices: Vec<_> = (0..10u8)
        .map(|i| client.publish("hello/world", vec![i; i as usize], QoS::AtLeastOnce, false))
        .collect();
    for notice in notices {
        println!("Acked = {:?}", notice.await?);
    }

    time::sleep(Duration::from_secs(1)).await;
    println!("Session = {:?}", client.snapshot().await?);
    client.disconnect().await?;
    Ok(())
}
