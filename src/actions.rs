use anyhow::{bail, Context, Result};
use grpc_tester::{
    config::Config, sample, schema, FixtureStore, Metadata, RequestData, RpcInvoker,
    SchemaCatalog,
};
use serde_json::Value;
use std::{fs, future::Future, path::Path, process};

fn run(result: Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "Failed to start runtime.")?;
    Ok(runtime.block_on(future))
}

fn config(c: &seahorse::Context) -> Result<Config> {
    Config::resolve(c.string_flag("workspace").ok(), c.string_flag("timeout").ok())
}

fn arg<'a>(c: &'a seahorse::Context, i: usize, what: &str) -> Result<&'a str> {
    match c.args.get(i) {
        Some(a) => Ok(a.as_str()),
        None => bail!("Missing {}.", what),
    }
}

fn print_response(name: Option<&str>, value: &Value) -> Result<()> {
    if let Some(name) = name {
        println!("\x1b[32mName\x1b[m: \x1b[35m{}\x1b[m", name);
        println!();
    }
    println!(
        "\x1b[34mResponse\x1b[m: \x1b[36m{}\x1b[m",
        serde_json::to_string_pretty(value)?
    );
    Ok(())
}

pub fn action_protos(c: &seahorse::Context) {
    run(protos(c))
}

fn protos(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let found = block_on(schema::find_schemas(&config.workspace))?
        .with_context(|| format!("Failed to scan {:?}", config.workspace))?;
    for f in found {
        println!("\x1b[35m{}\x1b[m {}", f.name, f.path.display());
    }
    Ok(())
}

pub fn action_services(c: &seahorse::Context) {
    run(services(c))
}

fn services(c: &seahorse::Context) -> Result<()> {
    let path = arg(c, 0, "schema file")?;
    let catalog = block_on(SchemaCatalog::load(path))??;
    if catalog.is_empty() {
        println!("No services found in {}.", path);
    }
    for service in catalog.services() {
        println!("\x1b[32m{}\x1b[m", service);
        for method in catalog.methods(service).unwrap_or_default() {
            println!("  {}", method);
        }
    }
    Ok(())
}

pub fn action_sample(c: &seahorse::Context) {
    run(generate_sample(c))
}

fn generate_sample(c: &seahorse::Context) -> Result<()> {
    let path = arg(c, 0, "schema file")?;
    let service = arg(c, 1, "service")?;
    let method = arg(c, 2, "method")?;
    let payload = block_on(sample::generate(path, service, method))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

pub fn action_call(c: &seahorse::Context) {
    run(call(c))
}

fn call(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let path = arg(c, 0, "schema file")?;
    let service = arg(c, 1, "service")?;
    let method = arg(c, 2, "method")?;
    let endpoint = c
        .string_flag("endpoint")
        .unwrap_or_else(|_| "localhost:50051".to_owned());
    let body: Value = match c.string_flag("body") {
        Ok(b) => serde_json::from_str(&b)
            .with_context(|| format!("Failed to parse body as json: {}", b))?,
        Err(_) => Value::Object(Default::default()),
    };
    let metadata = match c.string_flag("metadata") {
        Ok(m) => Metadata::from_json(&m)
            .with_context(|| format!("Failed to parse metadata as json: {}", m))?,
        Err(_) => Metadata::new(),
    };
    let invoker = RpcInvoker::with_timeout(config.timeout);
    let response =
        block_on(invoker.invoke(path, service, method, &endpoint, &body, &metadata))??;
    print_response(None, &response)
}

pub fn action_run(c: &seahorse::Context) {
    run(replay(c))
}

fn replay(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let key = arg(c, 0, "fixture")?;
    let name = c.args.get(1).map(String::as_str);
    let store = FixtureStore::from_config(&config);
    let Some(data) = block_on(store.read(key, name))?? else {
        bail!("No test {} in {}", name.unwrap_or("(first)"), key);
    };
    let invoker = RpcInvoker::with_timeout(config.timeout);
    let response = block_on(invoker.invoke_request(&data))??;
    print_response(data.name.as_deref(), &response)
}

/// A request file holds one request or an array of them.
fn open_requests<P: AsRef<Path>>(path: P) -> Result<Vec<RequestData>>
where
    P: std::fmt::Debug,
{
    let file = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to open file: {:?}", path))?;
    let reqs: Result<Vec<RequestData>, serde_json::error::Error> = serde_json::from_str(&file);
    match reqs {
        Ok(r) => Ok(r),
        _ => match RequestData::from_json(&file) {
            Ok(r) => Ok(vec![r]),
            Err(_) => bail!("Failed to parse json: {}", file),
        },
    }
}

pub fn action_save(c: &seahorse::Context) {
    run(save(c))
}

fn save(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    if c.args.is_empty() {
        bail!("Missing request file.");
    }
    let store = FixtureStore::from_config(&config);
    for path in &c.args {
        for req in open_requests(path)? {
            let key = block_on(store.upsert(&req))??;
            println!("Saved {} to {}.json", req.name.unwrap_or_default(), key);
        }
    }
    Ok(())
}

pub fn action_list(c: &seahorse::Context) {
    run(list(c))
}

fn list(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let store = FixtureStore::from_config(&config);
    for entry in block_on(store.list())?? {
        println!(
            "\x1b[35m{}\x1b[m  {}  ({})",
            entry.name,
            entry.service.unwrap_or_default(),
            entry.location_key
        );
    }
    Ok(())
}

pub fn action_show(c: &seahorse::Context) {
    run(show(c))
}

fn show(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let key = arg(c, 0, "fixture")?;
    let name = c.args.get(1).map(String::as_str);
    let store = FixtureStore::from_config(&config);
    match block_on(store.read(key, name))?? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => bail!("No test {} in {}", name.unwrap_or("(first)"), key),
    }
    Ok(())
}

pub fn action_delete(c: &seahorse::Context) {
    run(delete(c))
}

fn delete(c: &seahorse::Context) -> Result<()> {
    let config = config(c)?;
    let key = arg(c, 0, "fixture")?;
    let name = arg(c, 1, "test name")?;
    let store = FixtureStore::from_config(&config);
    block_on(store.delete(key, name))??;
    println!("Deleted {} from {}.json", name, key);
    Ok(())
}
