use std::cell::RefCell;
use std::rc::Rc;

use libiot_hub::error::Error;
use libiot_hub::message::{DeliveryToken, Disposition, InboundMessage};
use libiot_hub::method::{
    MethodId, MethodInvocation, MethodReply, MAX_OPEN_METHODS, STATUS_NOT_IMPLEMENTED, STATUS_TOO_MANY_OPEN,
};
use libiot_hub::queue::Outcome;
use libiot_hub::time::Instant;
use libiot_hub::transport::{Ack, Feature, TransportEvent};
use libiot_hub::twin::TwinUpdate;

mod mock;

use mock::{client, message, record, transport, OutcomeLog, ScriptedTransport};

fn invocation(id: u64, name: &str, payload: &[u8]) -> TransportEvent {
    TransportEvent::MethodInvocation(MethodInvocation {
        method_id: MethodId(id),
        name: heapless::String::try_from(name).unwrap(),
        payload: payload.to_vec(),
    })
}

fn desired(update: TwinUpdate, json: &str) -> TransportEvent {
    TransportEvent::DesiredProperties {
        update,
        payload: json.as_bytes().to_vec(),
    }
}

#[test]
fn desired_properties_reach_the_twin_callback_in_order() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    client
        .set_device_twin_callback(Some(Box::new(move |update: TwinUpdate, payload: &[u8]| {
            sink.borrow_mut().push((update, payload.to_vec()))
        })))
        .unwrap();
    assert_eq!(transport(&mut client).subscribed, vec![Feature::DeviceTwin]);

    let full = r#"{"desired":{"interval":10,"$version":3},"reported":{"$version":1}}"#;
    let patch = r#"{"interval":30,"$version":4}"#;
    transport(&mut client).push(desired(TwinUpdate::Complete, full));
    transport(&mut client).push(desired(TwinUpdate::Partial, patch));
    client.do_work().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            (TwinUpdate::Complete, full.as_bytes().to_vec()),
            (TwinUpdate::Partial, patch.as_bytes().to_vec()),
        ]
    );
    assert_eq!(client.last_desired_version().unwrap(), Some(4));
}

#[test]
fn repeated_patch_is_delivered_twice() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    let count = Rc::new(RefCell::new(0));
    let sink = count.clone();
    client
        .set_device_twin_callback(Some(Box::new(move |_: TwinUpdate, _: &[u8]| *sink.borrow_mut() += 1)))
        .unwrap();

    let patch = r#"{"led":true,"$version":7}"#;
    transport(&mut client).push(desired(TwinUpdate::Partial, patch));
    transport(&mut client).push(desired(TwinUpdate::Partial, patch));
    client.do_work().unwrap();

    assert_eq!(*count.borrow(), 2);
    assert_eq!(client.last_desired_version().unwrap(), Some(7));
}

#[test]
fn clearing_the_twin_callback_unsubscribes() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    client
        .set_device_twin_callback(Some(Box::new(|_: TwinUpdate, _: &[u8]| {})))
        .unwrap();
    client
        .set_device_twin_callback(Some(Box::new(|_: TwinUpdate, _: &[u8]| {})))
        .unwrap();
    client.set_device_twin_callback(None).unwrap();

    let wire = transport(&mut client);
    assert_eq!(wire.subscribed, vec![Feature::DeviceTwin]);
    assert_eq!(wire.unsubscribed, vec![Feature::DeviceTwin]);
}

#[test]
fn reported_state_callback_gets_the_service_status() {
    let (mut client, _clock) = client(ScriptedTransport::acking(Ack::Success(204)));
    let log = OutcomeLog::default();
    let id = client
        .send_reported_state(br#"{"firmware":"1.2.0"}"#, record(&log, 1))
        .unwrap();

    client.do_work().unwrap();
    assert_eq!(
        transport(&mut client).reported,
        vec![(id, br#"{"firmware":"1.2.0"}"#.to_vec())]
    );
    assert!(transport(&mut client).telemetry.is_empty());

    client.do_work().unwrap();
    assert_eq!(*log.borrow(), vec![(1, Outcome::Acked { status: 204 })]);
}

#[test]
fn empty_reported_state_is_rejected() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    let log = OutcomeLog::default();
    assert_eq!(
        client.send_reported_state(b"", record(&log, 1)).err(),
        Some(Error::InvalidArgument)
    );
    assert_eq!(client.pending_operations().unwrap(), 0);
}

#[test]
fn reboot_answered_inline_gets_exactly_one_response() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    client
        .set_device_method_callback(Some(Box::new(|invocation: &MethodInvocation| {
            assert_eq!(invocation.name.as_str(), "reboot");
            MethodReply::Respond {
                status: 200,
                payload: b"{}".to_vec(),
            }
        })))
        .unwrap();
    assert_eq!(transport(&mut client).subscribed, vec![Feature::DeviceMethods]);

    transport(&mut client).push(invocation(7, "reboot", b"{\"delay\":0}"));
    client.do_work().unwrap();

    assert_eq!(
        transport(&mut client).method_responses,
        vec![(MethodId(7), b"{}".to_vec(), 200)]
    );
    assert_eq!(
        client.device_method_response(MethodId(7), b"{}", 200),
        Err(Error::InvalidArgument)
    );
    assert_eq!(transport(&mut client).method_responses.len(), 1);
}

#[test]
fn deferred_method_is_answered_later() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    let deferred = Rc::new(RefCell::new(Vec::new()));
    let sink = deferred.clone();
    client
        .set_device_method_callback(Some(Box::new(move |invocation: &MethodInvocation| {
            sink.borrow_mut().push(invocation.method_id);
            MethodReply::Deferred
        })))
        .unwrap();

    transport(&mut client).push(invocation(42, "reboot", b""));
    client.do_work().unwrap();
    assert!(transport(&mut client).method_responses.is_empty());

    let id = deferred.borrow()[0];
    client.device_method_response(id, b"{\"ok\":true}", 200).unwrap();
    assert_eq!(
        transport(&mut client).method_responses,
        vec![(MethodId(42), b"{\"ok\":true}".to_vec(), 200)]
    );
    assert_eq!(
        client.device_method_response(id, b"", 200),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn method_without_handler_is_not_implemented() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    transport(&mut client).push(invocation(3, "reboot", b""));
    client.do_work().unwrap();

    assert_eq!(
        transport(&mut client).method_responses,
        vec![(MethodId(3), Vec::new(), STATUS_NOT_IMPLEMENTED)]
    );
}

#[test]
fn too_many_open_methods_are_refused() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    client
        .set_device_method_callback(Some(Box::new(|_: &MethodInvocation| MethodReply::Deferred)))
        .unwrap();

    for id in 0..=MAX_OPEN_METHODS as u64 {
        transport(&mut client).push(invocation(id, "slow", b""));
    }
    client.do_work().unwrap();

    assert_eq!(
        transport(&mut client).method_responses,
        vec![(MethodId(MAX_OPEN_METHODS as u64), Vec::new(), STATUS_TOO_MANY_OPEN)]
    );
    client.device_method_response(MethodId(0), b"", 200).unwrap();
}

#[test]
fn response_to_unknown_method_is_rejected() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    assert_eq!(
        client.device_method_response(MethodId(99), b"", 200),
        Err(Error::InvalidArgument)
    );
    assert!(transport(&mut client).method_responses.is_empty());
}

#[test]
fn messages_are_settled_with_the_callback_disposition() {
    let (mut client, clock) = client(ScriptedTransport::online());
    assert_eq!(
        client.get_last_message_receive_time(),
        Err(Error::NoMessageReceived)
    );
    client
        .set_message_callback(Some(Box::new(|message: &libiot_hub::message::Message| {
            if message.property("kind") == Some("bad") {
                Disposition::Rejected
            } else {
                Disposition::Accepted
            }
        })))
        .unwrap();
    assert_eq!(
        transport(&mut client).subscribed,
        vec![Feature::CloudToDeviceMessages]
    );

    clock.set(Instant::from_millis(2_500));
    transport(&mut client).push(TransportEvent::Message(InboundMessage {
        token: DeliveryToken(1),
        message: message(b"hello"),
    }));
    transport(&mut client).push(TransportEvent::Message(InboundMessage {
        token: DeliveryToken(2),
        message: message(b"nope").with_property("kind", "bad").unwrap(),
    }));
    client.do_work().unwrap();

    assert_eq!(
        transport(&mut client).dispositions,
        vec![
            (DeliveryToken(1), Disposition::Accepted),
            (DeliveryToken(2), Disposition::Rejected),
        ]
    );
    assert_eq!(
        client.get_last_message_receive_time(),
        Ok(Instant::from_millis(2_500))
    );
}

#[test]
fn message_without_callback_is_abandoned() {
    let (mut client, _clock) = client(ScriptedTransport::online());
    transport(&mut client).push(TransportEvent::Message(InboundMessage {
        token: DeliveryToken(5),
        message: message(b"orphan"),
    }));
    client.do_work().unwrap();

    assert_eq!(
        transport(&mut client).dispositions,
        vec![(DeliveryToken(5), Disposition::Abandoned)]
    );
    assert!(client.get_last_message_receive_time().is_ok());
}
