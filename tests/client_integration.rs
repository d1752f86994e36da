//! End-to-end tests against a loopback TCP listener standing in for the
//! logger hardware, covering round trips and failure handling at the
//! engine level. `Client::connect` spawns its own background reader task,
//! so these tests just race the client call against the fake server.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use solarman_v5::{with_connection, Client, ClientConfig};

fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wrap a Modbus RTU response (without its own CRC) in a complete V5
/// response envelope, appending the RTU's CRC and the V5 checksum.
fn wrap_response(serial: u32, sequence: u16, rtu_body: &[u8]) -> Vec<u8> {
    let crc = crc16_modbus(rtu_body);
    let mut rtu = rtu_body.to_vec();
    rtu.extend_from_slice(&crc.to_le_bytes());

    let n = rtu.len();
    let payload_len = (14 + n) as u16;
    let mut out = Vec::with_capacity(27 + n);
    out.push(0xA5);
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(&0x1510u16.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.push(0x02);
    out.push(0x01);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&rtu);
    let cksum = checksum(&out[1..]);
    out.push(cksum);
    out.push(0x15);
    out
}

/// Read the V5 request's sequence number back out of a raw request frame,
/// so the fake server can echo the low byte correctly.
fn request_sequence(frame: &[u8]) -> u16 {
    u16::from_le_bytes([frame[5], frame[6]])
}

#[tokio::test]
async fn read_holding_registers_round_trips_through_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let request = &buf[..n];
        let seq = request_sequence(request);

        // Function 0x03, unit 1, byte count 4, two registers: 0x0001 0x0002.
        let rtu_body = [0x01, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02];
        let response = wrap_response(0x1234_5678, seq, &rtu_body);
        stream.write_all(&response).await.unwrap();
        // Keep the socket open long enough for the client to read the reply.
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .retries(0)
        .build();
    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client.read_holding_registers(0, 2).await;

    assert_eq!(result.unwrap(), vec![1, 2]);
    server.await.unwrap();
}

#[tokio::test]
async fn sequence_low_byte_mismatch_is_surfaced_and_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let _ = stream.read(&mut buf).await.unwrap();

        // Respond with a deliberately wrong sequence, low byte mismatched.
        let rtu_body = [0x01, 0x03, 0x02, 0x00, 0x64];
        let response = wrap_response(0x1234_5678, 0x0041, &rtu_body);
        stream.write_all(&response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .retries(2)
        .build();
    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client.read_holding_registers(0, 1).await;

    assert!(matches!(
        result.unwrap_err(),
        solarman_v5::SolarmanError::SequenceMismatch { .. }
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn idle_timeout_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let request = &buf[..n];
        let seq = request_sequence(request);
        let rtu_body = [0x01, 0x03, 0x02, 0x00, 0x64];
        let response = wrap_response(0x1234_5678, seq, &rtu_body);
        stream.write_all(&response).await.unwrap();
        // Hold the connection open past the idle timeout.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .idle_timeout(Some(Duration::from_millis(50)))
        .retries(0)
        .build();
    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client.read_holding_registers(0, 1).await;
    assert!(result.is_ok());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!client.is_connected().await);

    server.await.unwrap();
}

#[tokio::test]
async fn mask_write_register_round_trips_through_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let request = &buf[..n];
        let seq = request_sequence(request);

        // Mask write echoes the request body verbatim (unit, fc, addr, masks).
        let rtu_body = [0x01, 0x16, 0x00, 0x04, 0xFF, 0x00, 0x00, 0xA5];
        let response = wrap_response(0x1234_5678, seq, &rtu_body);
        stream.write_all(&response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .retries(0)
        .build();
    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client.mask_write_register(0x0004, 0xFF00, 0x00A5).await;
    assert!(result.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn raw_rtu_crc_appended_round_trips_through_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let request = &buf[..n];
        let seq = request_sequence(request);

        let rtu_body = [0x01, 0x03, 0x02, 0x00, 0x2A];
        let response = wrap_response(0x1234_5678, seq, &rtu_body);
        stream.write_all(&response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .retries(0)
        .build();
    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client
        .raw_rtu_crc_appended(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .await;
    assert_eq!(result.unwrap(), vec![0x02, 0x00, 0x2A]);
    server.await.unwrap();
}

#[tokio::test]
async fn with_connection_closes_the_transport_after_a_successful_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let request = &buf[..n];
        let seq = request_sequence(request);

        let rtu_body = [0x01, 0x03, 0x02, 0x00, 0x07];
        let response = wrap_response(0x1234_5678, seq, &rtu_body);
        stream.write_all(&response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let config = ClientConfig::builder(addr.ip().to_string(), 0x1234_5678)
        .port(addr.port())
        .operation_timeout(Duration::from_secs(2))
        .retries(0)
        .build();

    let registers = with_connection(config, |client| async move {
        let result = client.read_holding_registers(0, 1).await;
        assert!(client.is_connected().await);
        result
    })
    .await
    .unwrap();

    assert_eq!(registers, vec![7]);
    server.await.unwrap();
}
