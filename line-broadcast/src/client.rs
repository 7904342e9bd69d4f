use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{is_exit_command, write_line},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = establish_connection(args.server).await?;
    let (reader, writer) = stream.into_split();

    let mut stdout = io::stdout();
    write_line(&mut stdout, &format!("*** connected to {}", args.server)).await?;

    let stdin = BufReader::new(io::stdin());
    select! {
        result = relay(BufReader::new(reader), writer, stdin, &mut stdout) => result?,
        ctrl_c = tokio::signal::ctrl_c() => handle_ctrl_c(ctrl_c),
    }

    Ok(())
}

async fn establish_connection(server: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    info!("connected to {}", server);
    Ok(stream)
}

/// Pumps typed lines to the server and server lines to `output` until the
/// server closes the connection.
///
/// Input stops being read after the exit command. When `input` runs dry the
/// write side is shut down, which the server treats as a disconnect, and the
/// loop keeps draining until the server hangs up.
pub async fn relay<R, W, I, O>(server: R, mut writer: W, input: I, output: &mut O) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut server_lines = server.lines();
    let mut input_lines = input.lines();
    let mut input_open = true;

    loop {
        select! {
            line = server_lines.next_line() => {
                match line.context("failed to read from server")? {
                    Some(line) => write_line(output, &line).await?,
                    None => {
                        write_line(output, "*** server closed the connection").await?;
                        break;
                    }
                }
            }
            typed = input_lines.next_line(), if input_open => {
                match typed.context("failed to read input")? {
                    Some(text) => {
                        write_line(&mut writer, &text)
                            .await
                            .context("failed to send line")?;
                        // The server ends the session; stop reading so no
                        // stdin read is left blocking runtime shutdown.
                        if is_exit_command(&text) {
                            input_open = false;
                        }
                    }
                    None => {
                        input_open = false;
                        shutdown_connection(&mut writer).await;
                    }
                }
            }
        }
    }

    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relays_both_directions_until_server_closes() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let first = lines.next_line().await.unwrap();
            write_line(&mut server_write, "[127.0.0.1:9]: yo").await.unwrap();
            let second = lines.next_line().await.unwrap();
            server_write.shutdown().await.unwrap();
            (first, second)
        });

        let input: &[u8] = b"hi\nexit\n";
        let mut output = Vec::new();
        relay(BufReader::new(client_read), client_write, input, &mut output)
            .await
            .expect("relay");

        let (first, second) = server.await.expect("server task");
        assert_eq!(first.as_deref(), Some("hi"));
        assert_eq!(second.as_deref(), Some("exit"));
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "[127.0.0.1:9]: yo\n*** server closed the connection\n"
        );
    }
}
