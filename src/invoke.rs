use crate::{
    error::{chain, Error, Result},
    schema::{self, Schema},
    types::{Metadata, RequestData},
};
use log::{error, info};
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;
use std::{io, path::Path, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{timeout_at, Instant},
};
use tonic::{
    client::Grpc,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
    codegen::http::uri::PathAndQuery,
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::Endpoint,
    Code, Status,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP/2 client connection preface followed by an empty SETTINGS frame.
const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n\x00\x00\x00\x04\x00\x00\x00\x00\x00";
const SETTINGS_FRAME: u8 = 0x4;

/// Makes unary calls described only by a schema file. Nothing is cached
/// between calls: every invocation compiles the schema and dials the
/// endpoint again, over plaintext HTTP/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcInvoker {
    timeout: Duration,
}

impl Default for RpcInvoker {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RpcInvoker {
    /// `timeout` bounds connecting and the call together.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs a stored request, parsing its body and metadata text first.
    pub async fn invoke_request(&self, data: &RequestData) -> Result<Value> {
        if data.schema_path.is_empty() {
            return Err(Error::invocation("No proto file selected"));
        }
        let body = data
            .body_value()
            .map_err(|e| Error::invocation(format!("Invalid request body: {}", e)))?;
        let metadata = data
            .metadata_value()
            .map_err(|e| Error::invocation(format!("Invalid metadata: {}", e)))?;
        self.invoke(
            &data.schema_path,
            &data.service,
            &data.method,
            &data.endpoint,
            &body,
            &metadata,
        )
        .await
    }

    pub async fn invoke<P: AsRef<Path>>(
        &self,
        schema_path: P,
        service: &str,
        method: &str,
        endpoint: &str,
        body: &Value,
        metadata: &Metadata,
    ) -> Result<Value> {
        let schema = Schema::load(schema_path).await?;
        let service_desc = schema
            .service(service)
            .ok_or_else(|| Error::invocation(format!("Service {} not found", service)))?;

        let connection_error = |cause: String| Error::Connection {
            endpoint: endpoint.to_owned(),
            timeout: self.timeout,
            cause,
        };
        let target = Endpoint::from_shared(format!("http://{}", endpoint))
            .map_err(|e| connection_error(chain(&e)))?;
        let deadline = Instant::now() + self.timeout;

        info!("[gRPC] Connecting to {}...", endpoint);
        match timeout_at(deadline, handshake(endpoint)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("[gRPC] Connection failed: {}", e);
                return Err(connection_error(e.to_string()));
            }
            Err(_) => {
                error!("[gRPC] {} did not become ready in time", endpoint);
                return Err(connection_error("no HTTP/2 settings before the deadline".into()));
            }
        }
        let channel = match timeout_at(deadline, target.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                error!("[gRPC] Connection failed: {}", chain(&e));
                return Err(connection_error(chain(&e)));
            }
            Err(_) => {
                error!("[gRPC] Connection to {} timed out", endpoint);
                return Err(connection_error("deadline exceeded".into()));
            }
        };
        let mut client = Grpc::new(channel);
        match timeout_at(deadline, client.ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(connection_error(chain(&e))),
            Err(_) => return Err(connection_error("deadline exceeded".into())),
        }
        info!("[gRPC] Connected. Invoking {}...", method);

        let metadata = metadata_map(metadata)?;
        let method_desc = schema::method(service_desc, method).ok_or_else(|| {
            Error::invocation(format!("Method {} not found on {}", method, service))
        })?;
        if method_desc.is_client_streaming() || method_desc.is_server_streaming() {
            return Err(Error::invocation(format!(
                "Method {} is streaming; only unary calls are supported",
                method
            )));
        }
        let input = method_desc.input();
        let message = DynamicMessage::deserialize_with_options(
            input.clone(),
            body.clone(),
            &DeserializeOptions::new().deny_unknown_fields(false),
        )
        .map_err(|e| {
            Error::invocation(format!("Invalid body for {}: {}", input.full_name(), e))
        })?;
        let path = PathAndQuery::try_from(format!("/{}/{}", service_desc.full_name(), method))
            .map_err(|e| Error::invocation(e.to_string()))?;

        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = metadata;
        request.set_timeout(deadline.saturating_duration_since(Instant::now()));

        let codec = DynamicCodec::new(method_desc.output());
        let response = match timeout_at(deadline, client.unary(request, path, codec)).await {
            Ok(Ok(response)) => response,
            Ok(Err(status)) => {
                error!("[gRPC] Request failed: {}", status);
                return Err(status.into());
            }
            Err(_) => {
                error!("[gRPC] Request to {} timed out", endpoint);
                return Err(Status::new(Code::DeadlineExceeded, "Deadline exceeded").into());
            }
        };
        info!("[gRPC] Request successful");

        let options = SerializeOptions::new()
            .use_proto_field_name(true)
            .skip_default_fields(false);
        response
            .into_inner()
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| Error::invocation(format!("Failed to render response: {}", e)))
    }
}

/// Waits until `endpoint` speaks HTTP/2: the server has to answer the client
/// preface with its own SETTINGS frame. An accepted TCP connection alone is
/// not ready.
async fn handshake(endpoint: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect(endpoint).await?;
    stream.write_all(PREFACE).await?;
    let mut header = [0u8; 9];
    stream.read_exact(&mut header).await?;
    if header[3] != SETTINGS_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "peer did not answer with HTTP/2 settings",
        ));
    }
    Ok(())
}

/// Builds call metadata. Keys ending in `-bin` carry raw bytes.
pub fn metadata_map(metadata: &Metadata) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();
    for (key, value) in metadata.iter() {
        let key = key.to_ascii_lowercase();
        let invalid = |what: &str| Error::invocation(format!("Invalid metadata {} for {}", what, key));
        if key.ends_with("-bin") {
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes()).map_err(|_| invalid("key"))?;
            map.append_bin(name, MetadataValue::<Binary>::from_bytes(value.as_bytes()));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes()).map_err(|_| invalid("key"))?;
            let value = MetadataValue::<Ascii>::try_from(value).map_err(|_| invalid("value"))?;
            map.append(name, value);
        }
    }
    Ok(map)
}

/// Encodes any dynamic message and decodes messages of one type known only
/// at runtime: the response on the client side, the request on a server.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    decodes: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(decodes: MessageDescriptor) -> Self {
        Self { decodes }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.decodes.clone())
    }
}

#[derive(Debug)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("Failed to encode message: {}", e)))
    }
}

#[derive(Debug)]
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let message = DynamicMessage::decode(self.0.clone(), src)
            .map_err(|e| Status::internal(format!("Failed to decode message: {}", e)))?;
        Ok(Some(message))
    }
}
