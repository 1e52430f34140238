use crossterm::tty::IsTty;
use rustyline_async::{Readline, ReadlineError, SharedWriter};
use std::io::{self, BufRead, Lines, Stderr, StdinLock, Stdout, Write};

pub struct ShellRead {
    prompt: String,
    inner: ShellReadInner,
}

pub struct ShellWrite {
    inner: ShellWriteInner,
}

/// What the user did at the prompt.
pub enum Input {
    Line(String),
    Eof,
    Interrupted,
}

enum ShellReadInner {
    Interactive(Readline, SharedWriter),
    Stream(Lines<StdinLock<'static>>),
}

enum ShellWriteInner {
    Interactive(SharedWriter),
    Stream(Stdout, Stderr),
}

/// Use a line editor when attached to a terminal, plain stdin lines otherwise.
pub fn new_shell(prompt: String, disable_interactive: bool) -> io::Result<(ShellRead, ShellWrite)> {
    if !disable_interactive && io::stdout().is_tty() {
        let (read_line, writer) = Readline::new(prompt.clone()).map_err(into_io)?;
        Ok((
            ShellRead {
                prompt,
                inner: ShellReadInner::Interactive(read_line, writer.clone()),
            },
            ShellWrite {
                inner: ShellWriteInner::Interactive(writer),
            },
        ))
    } else {
        Ok((
            ShellRead {
                prompt,
                inner: ShellReadInner::Stream(io::stdin().lock().lines()),
            },
            ShellWrite {
                inner: ShellWriteInner::Stream(io::stdout(), io::stderr()),
            },
        ))
    }
}

impl ShellRead {
    pub async fn read_line(&mut self) -> io::Result<Input> {
        match &mut self.inner {
            ShellReadInner::Interactive(read, writer) => {
                let line = match read.readline().await {
                    Ok(line) => line,
                    Err(ReadlineError::Eof | ReadlineError::Closed) => return Ok(Input::Eof),
                    Err(ReadlineError::Interrupted) => return Ok(Input::Interrupted),
                    Err(err) => return Err(into_io(err)),
                };

                read.add_history_entry(line.clone());

                // echo back the line
                writeln!(writer, "{}{}", self.prompt, line)?;

                Ok(Input::Line(line))
            }
            ShellReadInner::Stream(stream) => match stream.next() {
                Some(line) => line.map(Input::Line),
                None => Ok(Input::Eof),
            },
        }
    }
}

impl ShellWrite {
    pub fn out(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(stdout, _) => stdout,
        }
    }

    pub fn err(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(_, stderr) => stderr,
        }
    }
}

fn into_io(err: ReadlineError) -> io::Error {
    match err {
        ReadlineError::IO(err) => err,
        other => io::Error::new(io::ErrorKind::Other, format!("{:?}", other)),
    }
}
