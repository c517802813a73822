//! Binary entrypoint for the CAPI demo provisioning server.

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    capi_demo_server::run_server().await
}
