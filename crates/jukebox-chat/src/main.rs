use clap::Parser;
use jukebox_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

/// Line-oriented chat client for jukeboxd
#[derive(Parser, Debug)]
#[command(name = "jukebox-chat")]
#[command(about = "Talk to the jukebox daemon like a chat channel")]
#[command(version)]
struct Args {
    /// Daemon address
    #[arg(short, long, default_value_t = jukebox_proto::platform::daemon_address())]
    address: String,

    /// Channel to join on startup; also tagged on every line sent
    #[arg(short, long)]
    channel: Option<String>,
}

async fn send(writer: &mut OwnedWriteHalf, cmd: Command) -> anyhow::Result<()> {
    let encoded = Message::Command(cmd).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

fn print_broadcast(broadcast: Broadcast) {
    match broadcast {
        Broadcast::Hello {
            protocol_version, ..
        } if protocol_version != PROTOCOL_VERSION => {
            eprintln!(
                "warning: daemon speaks protocol {}, this client {}",
                protocol_version, PROTOCOL_VERSION
            );
        }
        Broadcast::Status { message } => println!("{}", message.trim_end()),
        Broadcast::Error { message } => eprintln!("error: {}", message),
        Broadcast::Log { message } => eprintln!("{}", message),
        Broadcast::Hello { .. } | Broadcast::State { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.address).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    if let Some(channel) = &args.channel {
        send(
            &mut write_half,
            Command::Join {
                channel: channel.clone(),
            },
        )
        .await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(text) = line? else { break };
                if text.trim().is_empty() {
                    continue;
                }
                send(&mut write_half, Command::Say { text, channel: args.channel.clone() }).await?;
            }
            result = read_half.read(&mut tmp) => {
                let n = result?;
                if n == 0 {
                    eprintln!("daemon closed the connection");
                    break;
                }
                read_buf.extend_from_slice(&tmp[..n]);
                while let Some((msg, consumed)) = Message::decode(&read_buf)? {
                    read_buf.drain(..consumed);
                    if let Message::Broadcast(broadcast) = msg {
                        print_broadcast(broadcast);
                    }
                }
            }
        }
    }

    Ok(())
}
