//! Integration tests for the DEALER/ROUTER compute fabric: unary compute
//! calls, timeouts, and the streamed big-bang exchange against an in-process
//! stub worker.

use std::time::Duration;

use petri_core::{BucketKey, Cell};
use petri_wire::{
    topics, BigBangRequest, CellChunk, ComputeBatch, ComputeService, Endpoint, Envelope,
    RequestListener, ReturnedBatch, WireError, ZmqComputeClient,
};

const SETTLE: Duration = Duration::from_millis(200);
const TIMEOUT: Duration = Duration::from_secs(5);

fn batch_for(cells: Vec<Cell>, key: BucketKey, time_step: u64) -> ComputeBatch {
    ComputeBatch {
        cells_to_compute: cells,
        cells_in_proximity: Vec::new(),
        time_step,
        batch_key: key,
    }
}

#[tokio::test]
async fn compute_call_roundtrip() {
    let endpoint = Endpoint::tcp("127.0.0.1", 17500);

    let listener = RequestListener::bind(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqComputeClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    // Stub worker: echo the batch's cells back.
    let worker = tokio::spawn(async move {
        let (token, request) = listener.recv_request().await.unwrap();
        assert_eq!(request.topic, topics::COMPUTE);
        let batch: ComputeBatch = request.decode().unwrap();
        let reply = ReturnedBatch {
            cells_to_compute: batch.cells_to_compute,
            batch_key: batch.batch_key,
        };
        let envelope = request.reply_to(topics::COMPUTE_REPLY, &reply).unwrap();
        listener.send_reply(&token, &envelope).await.unwrap();
    });

    let cells = vec![Cell::at(1.0, 1.0, 1.0), Cell::at(2.0, 2.0, 2.0)];
    let key = BucketKey::new(0, 0, 0);
    let returned = client
        .compute(batch_for(cells.clone(), key, 3), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(returned.batch_key, key);
    assert_eq!(returned.cells_to_compute, cells);
    worker.await.unwrap();
}

#[tokio::test]
async fn compute_call_times_out_against_silent_worker() {
    let endpoint = Endpoint::tcp("127.0.0.1", 17510);

    // Bind but never reply.
    let _listener = RequestListener::bind(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqComputeClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let short = Duration::from_millis(300);
    let result = client
        .compute(batch_for(vec![Cell::at(0.0, 0.0, 0.0)], BucketKey::new(0, 0, 0), 0), short)
        .await;

    match result {
        Err(WireError::Timeout(d)) => assert_eq!(d, short),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn big_bang_streams_chunks_until_done() {
    let endpoint = Endpoint::tcp("127.0.0.1", 17520);

    let listener = RequestListener::bind(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqComputeClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let worker = tokio::spawn(async move {
        let (token, request) = listener.recv_request().await.unwrap();
        assert_eq!(request.topic, topics::BIG_BANG);
        let params: BigBangRequest = request.decode().unwrap();
        assert_eq!(params.cell_amount, 6);

        // Three chunks of two cells each, then the done frame.
        for i in 0..3u32 {
            let chunk = CellChunk {
                cells: vec![
                    Cell::at(i as f32, 0.0, 0.0),
                    Cell::at(i as f32, 1.0, 0.0),
                ],
            };
            let envelope = request.reply_to(topics::BIG_BANG_CHUNK, &chunk).unwrap();
            listener.send_reply(&token, &envelope).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let done = request.reply_to(topics::BIG_BANG_DONE, &()).unwrap();
        listener.send_reply(&token, &done).await.unwrap();
    });

    let request = BigBangRequest {
        cell_amount: 6,
        extent: 100.0,
        min_energy: 50,
        max_energy: 150,
    };
    let mut stream = client.big_bang(request).await.unwrap();

    let mut cells = Vec::new();
    while let Some(chunk) = tokio::time::timeout(TIMEOUT, stream.recv()).await.unwrap() {
        cells.extend(chunk.unwrap().cells);
    }

    assert_eq!(cells.len(), 6);
    worker.await.unwrap();
}

#[tokio::test]
async fn registration_request_reaches_listener() {
    use petri_wire::{RegisterAck, RegisterWorker};

    let endpoint = Endpoint::tcp("127.0.0.1", 17530);

    let listener = RequestListener::bind(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqComputeClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let master = tokio::spawn(async move {
        let (token, request) = listener.recv_request().await.unwrap();
        assert_eq!(request.topic, topics::REGISTER);
        let reg: RegisterWorker = request.decode().unwrap();
        assert_eq!(reg.address, "127.0.0.1:17531");
        assert_eq!(reg.threads, 4);

        let ack = request
            .reply_to(topics::REGISTER_ACK, &RegisterAck { accepted: 4 })
            .unwrap();
        listener.send_reply(&token, &ack).await.unwrap();
    });

    // Registration rides the same envelope fabric as compute calls.
    let registration = RegisterWorker {
        address: "127.0.0.1:17531".into(),
        threads: 4,
    };
    let envelope = Envelope::encode(topics::REGISTER, &registration).unwrap();
    let reply = client.request(envelope, TIMEOUT).await.unwrap();
    assert_eq!(reply.topic, topics::REGISTER_ACK);

    let ack: RegisterAck = reply.decode().unwrap();
    assert_eq!(ack.accepted, 4);
    master.await.unwrap();
}
