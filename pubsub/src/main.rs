//! Publishes to and subscribes to a topic over a mutually authenticated MQTT connection.

use std::error::Error;
use std::fs;
use std::thread;
use std::time::Duration;

use clap::Parser;
use iotmqc::{
    Callbacks, Client, ClientError, Message, MqttOptions, Notice, OptionBuilder, Proxy,
    PublishResult, QoS, ResubscribeError, TlsConfiguration,
};

mod args;
use args::Args;

/// What the callbacks report back to the main thread
enum Signal {
    Received(Message),
    ResubscribeRejected(ResubscribeError),
    /// The client gave up on the connection
    Closed,
}

/// Reasons the sample stops before it is done
#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("Server rejected resubscribe to topics: {:?}", .0.rejected)]
    Resubscribe(#[from] ResubscribeError),
    #[error("Connection closed by the client after it could not be resumed")]
    Closed,
    #[error("Publish failed: {0}")]
    Publish(#[from] ClientError),
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    color_backtrace::install();

    let args = Args::parse();
    let options = options(&args)?;

    let (signal_tx, signal_rx) = flume::unbounded();
    let client = Client::new(options, callbacks(signal_tx.clone()))?;

    if args.ci {
        println!("Connecting to endpoint with client ID");
    } else {
        println!(
            "Connecting to {} with client ID '{}'...",
            args.endpoint, args.client_id
        );
    }
    client.connect().wait()?;
    println!("Connected!");

    if args.mode.subscribes() {
        println!("Subscribing to topic '{}'...", args.topic);
        let received = signal_tx;
        let subscribed = client
            .subscribe(&args.topic, QoS::AtLeastOnce, move |message| {
                let _ = received.send(Signal::Received(message));
            })
            .wait()?;
        println!("Subscribed with QoS: {:?}", subscribed.granted);
    }

    let mut received = 0;
    if args.mode.publishes() {
        if args.count == 0 {
            println!("Sending messages until program is terminated");
        } else {
            println!("Sending {} message(s)", args.count);
        }

        // the loop does not wait for acks, completed publishes are collected as it goes
        let mut outstanding = Vec::new();
        let mut n = 1;
        while args.count == 0 || n <= args.count {
            let message = format!("{} [{}]", args.message, n);
            let payload = serde_json::to_string(&message)?;
            println!("Publishing message to topic '{}': {}", args.topic, message);
            outstanding.push(client.publish(&args.topic, payload, QoS::AtLeastOnce, false));
            thread::sleep(Duration::from_secs(1));

            for signal in signal_rx.try_iter() {
                received += handle(signal)?;
            }
            reap(&mut outstanding).map_err(Failure::from)?;
            n += 1;
        }

        for notice in outstanding {
            notice.wait().map_err(Failure::from)?;
        }
    }

    if args.mode.subscribes() {
        if args.count != 0 && received < args.count {
            println!("Waiting for all messages to be received...");
        }
        while args.count == 0 || received < args.count {
            let Ok(signal) = signal_rx.recv() else {
                break;
            };
            received += handle(signal)?;
        }
        println!("{received} message(s) received.");
    }

    println!("Disconnecting...");
    client.disconnect().wait()?;
    println!("Disconnected!");
    Ok(())
}

/// Returns the number of received messages the signal accounts for
fn handle(signal: Signal) -> Result<u64, Failure> {
    match signal {
        Signal::Received(message) => {
            println!(
                "Received message from topic '{}': {}",
                message.topic,
                String::from_utf8_lossy(&message.payload)
            );
            Ok(1)
        }
        Signal::ResubscribeRejected(e) => Err(e.into()),
        Signal::Closed => Err(Failure::Closed),
    }
}

/// Drops completed publishes. Fails with the first one that did not succeed.
fn reap(outstanding: &mut Vec<Notice<PublishResult>>) -> Result<(), ClientError> {
    let mut failure = None;
    outstanding.retain(|notice| match notice.wait_timeout(Duration::ZERO) {
        Ok(_) => false,
        Err(ClientError::WaitTimeout) => true,
        Err(e) => {
            failure.get_or_insert(e);
            false
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn options(args: &Args) -> Result<MqttOptions, Box<dyn Error>> {
    let ca = fs::read(&args.root_ca)?;
    let cert = fs::read(&args.cert)?;
    let key = fs::read(&args.key)?;
    let tls = TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: Some((cert, key)),
    };

    let mut builder = OptionBuilder::new_tls(&args.endpoint, args.port, tls)
        .client_id(&args.client_id)
        .clean_session(false)
        .keep_alive(Duration::from_secs(30));

    if let Some((host, port)) = args.proxy() {
        builder = builder.proxy(Proxy::new(host, port));
    }

    Ok(builder.finalize())
}

fn callbacks(signals: flume::Sender<Signal>) -> Callbacks {
    let closed = signals.clone();
    Callbacks::new()
        .on_connection_success(|result| {
            println!(
                "Connection Successful with return code: {:?} session present: {}",
                result.return_code, result.session_present
            )
        })
        .on_connection_failure(|error| println!("Connection failed with error: {error}"))
        .on_connection_interrupted(|error| println!("Connection interrupted. error: {error}"))
        .on_connection_resumed(|result| {
            println!(
                "Connection resumed. return_code: {:?} session_present: {}",
                result.return_code, result.session_present
            );
            if !result.session_present {
                println!("Session did not persist. Resubscribing to existing topics...");
            }
        })
        .on_resubscribe_complete(move |result| match result {
            Ok(results) => println!("Resubscribe results: {results:?}"),
            Err(e) => {
                let _ = signals.send(Signal::ResubscribeRejected(e));
            }
        })
        .on_connection_closed(move || {
            println!("Connection closed");
            let _ = closed.send(Signal::Closed);
        })
}
