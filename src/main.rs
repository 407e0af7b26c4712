use std::error::Error;
use std::net::{IpAddr, SocketAddr};

use mqttchannel::config::load_config;
use mqttchannel::transport::server::Server;
use mqttchannel::utils::logging;

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let config = load_config()?;
    logging::init(&config.logging.level);

    let host: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(host, config.server.port);
    let mut server = Server::bind(addr, config.channel)?;
    server.run()?;
    Ok(())
}
