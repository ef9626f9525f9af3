use std::ops::Deref;

use cidre::{arc, av, dispatch};
use reel_media::{CaptureError, Completion, completion};
use tracing::*;

/// Fails unless the user has granted access to `media_type`, asking first
/// when they have never been asked.
pub(crate) fn ensure_access(
    media_type: &av::MediaType,
    what: &'static str,
) -> Result<(), CaptureError> {
    let status = av::CaptureDevice::authorization_status_for_media_type(media_type)
        .map_err(|e| CaptureError::Start(format!("{what} authorization: {e:?}")))?;

    match status {
        av::AuthorizationStatus::Authorized => Ok(()),
        av::AuthorizationStatus::NotDetermined => {
            debug!(what, "Requesting capture access");
            let granted = futures::executor::block_on(
                av::CaptureDevice::request_access_for_media_type(media_type),
            )
            .map_err(|e| CaptureError::Start(format!("{what} authorization: {e:?}")))?;

            if granted {
                Ok(())
            } else {
                Err(CaptureError::PermissionDenied(what))
            }
        }
        av::AuthorizationStatus::Denied | av::AuthorizationStatus::Restricted => {
            Err(CaptureError::PermissionDenied(what))
        }
    }
}

/// Runs `f` on a fresh thread. Starting and stopping a capture session
/// blocks until the hardware responds.
pub(crate) fn run_blocking<T: Send + 'static>(
    name: &str,
    f: impl FnOnce() -> T + Send + 'static,
) -> Completion<Result<T, CaptureError>> {
    let (completer, completion) = completion();

    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || completer.complete(Ok(f())));

    match spawned {
        Ok(_) => completion,
        Err(e) => Completion::ready(Err(CaptureError::Start(e.to_string()))),
    }
}

/// A running `AVCaptureSession` with one device input and one data output.
pub(crate) struct DeviceSession<O, D> {
    session: arc::R<av::capture::Session>,
    _input: arc::R<av::capture::DeviceInput>,
    _output: arc::R<O>,
    _delegate: arc::R<D>,
    _queue: arc::R<dispatch::Queue>,
}

unsafe impl<O, D> Send for DeviceSession<O, D> {}

impl<O, D> DeviceSession<O, D>
where
    O: Deref<Target = av::CaptureOutput>,
{
    pub fn start(
        input: arc::R<av::capture::DeviceInput>,
        output: arc::R<O>,
        delegate: arc::R<D>,
        queue: arc::R<dispatch::Queue>,
    ) -> Result<Self, CaptureError> {
        let output_ref: &av::CaptureOutput = &output;

        let mut session = av::capture::Session::new();
        let mut refused = None;

        session.configure(|s| {
            if !s.can_add_input(&input) {
                refused = Some("input");
                return;
            }
            s.add_input(&input);

            if !s.can_add_output(output_ref) {
                refused = Some("output");
                return;
            }
            s.add_output(output_ref);
        });

        if let Some(what) = refused {
            return Err(CaptureError::Start(format!(
                "capture session refused the {what}"
            )));
        }

        session.start_running();

        Ok(Self {
            session,
            _input: input,
            _output: output,
            _delegate: delegate,
            _queue: queue,
        })
    }

    pub fn stop(mut self) {
        self.session.stop_running();
    }
}
