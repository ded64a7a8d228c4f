mod actions;
use actions::{
    action_call, action_delete, action_list, action_protos, action_run, action_sample,
    action_save, action_services, action_show,
};
use anyhow::Result;
use seahorse::{App, Command, Flag, FlagType};
use std::env;

fn workspace_flag() -> Flag {
    Flag::new("workspace", FlagType::String)
        .description("Workspace root holding .grpc-tests (default: $GRPC_TESTER_WORKSPACE or .)")
        .alias("w")
}

fn timeout_flag() -> Flag {
    Flag::new("timeout", FlagType::String)
        .description("Seconds to wait for the endpoint and the call (default: 5)")
        .alias("t")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args: Vec<String> = env::args().collect();
    let app = App::new(env!("CARGO_PKG_NAME"))
        .description(env!("CARGO_PKG_DESCRIPTION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .usage("grpc-tester [command] [args]")
        .command(
            Command::new("protos")
                .description("List .proto files in the workspace")
                .usage("grpc-tester protos [--workspace dir]")
                .flag(workspace_flag())
                .action(action_protos),
        )
        .command(
            Command::new("services")
                .description("List services and methods of a .proto file")
                .usage("grpc-tester services [proto]")
                .action(action_services),
        )
        .command(
            Command::new("sample")
                .description("Print a default request body for a method")
                .usage("grpc-tester sample [proto] [service] [method]")
                .action(action_sample),
        )
        .command(
            Command::new("call")
                .description("Invoke a unary method")
                .usage("grpc-tester call [proto] [service] [method] --endpoint host:port")
                .flag(
                    Flag::new("endpoint", FlagType::String)
                        .description("host:port (default: localhost:50051)")
                        .alias("e"),
                )
                .flag(
                    Flag::new("body", FlagType::String)
                        .description("Request body as json")
                        .alias("b"),
                )
                .flag(
                    Flag::new("metadata", FlagType::String)
                        .description("Metadata as a json object")
                        .alias("m"),
                )
                .flag(workspace_flag())
                .flag(timeout_flag())
                .action(action_call),
        )
        .command(
            Command::new("run")
                .description("Invoke a saved test")
                .usage("grpc-tester run [fixture] [name]")
                .flag(workspace_flag())
                .flag(timeout_flag())
                .action(action_run),
        )
        .command(
            Command::new("save")
                .description("Save request json files as tests")
                .usage("grpc-tester save [path to json files]")
                .flag(workspace_flag())
                .action(action_save),
        )
        .command(
            Command::new("list")
                .description("List saved tests")
                .usage("grpc-tester list")
                .flag(workspace_flag())
                .action(action_list),
        )
        .command(
            Command::new("show")
                .description("Print a saved test")
                .usage("grpc-tester show [fixture] [name]")
                .flag(workspace_flag())
                .action(action_show),
        )
        .command(
            Command::new("delete")
                .description("Delete a saved test")
                .usage("grpc-tester delete [fixture] [name]")
                .flag(workspace_flag())
                .action(action_delete),
        );
    app.run(args);
    Ok(())
}
