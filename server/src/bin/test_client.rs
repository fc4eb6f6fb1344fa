use shared::{to_line, ClientMessage, Move, ServerMessage};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

async fn read_message(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
) -> Result<ServerMessage, Box<dyn std::error::Error>> {
    loop {
        let line = match timeout(READ_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err("server closed the connection".into()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err("timed out waiting for the server".into()),
        };

        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ServerMessage>(&line) {
            Ok(message) => return Ok(message),
            Err(e) => println!("Skipping unparseable line: {}", e),
        }
    }
}

async fn send(
    write_half: &mut OwnedWriteHalf,
    message: &ClientMessage,
) -> Result<(), Box<dyn std::error::Error>> {
    write_half.write_all(to_line(message)?.as_bytes()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server address
    let server_addr = "127.0.0.1:12345";

    println!("Connecting to {}", server_addr);
    let stream = TcpStream::connect(server_addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // The first message tells us which seat we got
    let seat = match read_message(&mut lines).await? {
        ServerMessage::LobbyInit {
            your_id,
            is_host,
            players,
            ..
        } => {
            println!("Seated as {} (host: {}), lobby: {:?}", your_id, is_host, players);
            your_id
        }
        other => {
            println!("Expected lobby_init but got: {:?}", other);
            return Ok(());
        }
    };

    println!("Sending ready");
    send(&mut write_half, &ClientMessage::Ready { player_id: seat }).await?;

    sleep(Duration::from_millis(300)).await;
    println!("Requesting game start");
    send(&mut write_half, &ClientMessage::StartRequest { player_id: seat }).await?;

    println!("Waiting for game start (needs at least 2 ready players)...");
    let mut started = false;
    for _ in 0..40 {
        match read_message(&mut lines).await {
            Ok(ServerMessage::GameStart) => {
                started = true;
                break;
            }
            Ok(ServerMessage::LobbyUpdate {
                players,
                ready_states,
                can_start,
            }) => {
                println!(
                    "Lobby update - players: {:?}, ready: {:?}, can_start: {}",
                    players, ready_states, can_start
                );
                // Someone else may have become ready in the meantime
                if can_start {
                    send(&mut write_half, &ClientMessage::StartRequest { player_id: seat })
                        .await?;
                }
            }
            Ok(ServerMessage::ServerDown { message }) => {
                println!("Server going down: {}", message);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                println!("Giving up on game start: {}", e);
                break;
            }
        }
    }

    if started {
        println!("Game started, walking a short path");
        let steps = [
            (1, 0),
            (0, 1),
            (1, 0),
            (0, 1),
            (-1, 0),
            (0, -1),
            (1, 0),
            (0, 1),
            (1, 0),
            (0, 1),
        ];

        for (dx, dy) in steps {
            let input = ClientMessage::Input {
                player_id: seat,
                step: Move { dx, dy },
            };
            send(&mut write_half, &input).await?;

            match read_message(&mut lines).await {
                Ok(ServerMessage::Update {
                    players,
                    flag,
                    locked_cells,
                }) => {
                    println!("Update - flag: {:?}, locked: {:?}", flag, locked_cells);
                    for player in players {
                        println!(
                            "  Player {}: pos={:?}, has_flag={}, score={}",
                            player.id, player.pos, player.has_flag, player.score
                        );
                    }
                }
                Ok(other) => println!("Unexpected message: {:?}", other),
                Err(e) => println!("Error receiving update: {}", e),
            }

            sleep(Duration::from_millis(200)).await;
        }
    }

    // Leave cleanly so the seat frees up right away
    println!("Sending disconnect request");
    send(&mut write_half, &ClientMessage::Disconnect { player_id: seat }).await?;

    println!("Test client finished");
    Ok(())
}
